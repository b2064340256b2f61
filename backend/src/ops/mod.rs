//! Operator tasks behind `s2t-admin`: database wait, backup, restore and environment check

pub mod backup;
pub mod check;
pub mod restore;
pub mod wait;

use percent_encoding::percent_decode_str;
use reqwest::Url;

/// libpq connection parameters taken from a database URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
}

impl ConnectionParams {
    pub fn from_url(url: &str) -> anyhow::Result<Self> {
        let parsed = Url::parse(url)?;
        let dbname = parsed.path().trim_start_matches('/').to_string();
        if dbname.is_empty() {
            anyhow::bail!("database URL has no database name");
        }
        let user = decode_component(parsed.username())?;
        Ok(Self {
            host: parsed.host_str().unwrap_or("localhost").to_string(),
            port: parsed.port().unwrap_or(5432),
            user: if user.is_empty() {
                "postgres".to_string()
            } else {
                user
            },
            password: parsed.password().map(decode_component).transpose()?,
            dbname: decode_component(&dbname)?,
        })
    }

    /// `-h host -p port -U user` for the PostgreSQL client tools
    pub fn client_args(&self) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.host.clone(),
            "-p".to_string(),
            self.port.to_string(),
            "-U".to_string(),
            self.user.clone(),
        ]
    }

    /// A command for one of the PostgreSQL client tools with credentials applied
    pub fn command(&self, program: &str) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(program);
        command.args(self.client_args());
        if let Some(password) = &self.password {
            command.env("PGPASSWORD", password);
        }
        command
    }
}

/// Undo the percent-encoding `Url` keeps in user, password and path
fn decode_component(raw: &str) -> anyhow::Result<String> {
    Ok(percent_decode_str(raw).decode_utf8()?.into_owned())
}
