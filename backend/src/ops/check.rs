//! Deployment health check: environment, database, storage and engines

use std::fmt;

use sqlx::{Connection, PgConnection};

use crate::external::{HttpWhisperEngine, TranscriptionEngine};
use crate::storage::MediaStorage;
use crate::Config;

const GREEN: &str = "\x1b[0;32m";
const YELLOW: &str = "\x1b[1;33m";
const RED: &str = "\x1b[0;31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Required,
    Warning,
}

/// Variables the deployment expects, and whether their absence is fatal
pub const ENV_VARS: &[(&str, Severity)] = &[
    ("DB_NAME", Severity::Required),
    ("DB_USER", Severity::Required),
    ("DB_PASSWORD", Severity::Required),
    ("DB_HOST", Severity::Required),
    ("DB_PORT", Severity::Required),
    ("SECRET_KEY", Severity::Required),
    ("STRIPE_SECRET_KEY", Severity::Warning),
    ("EMAIL_HOST_USER", Severity::Warning),
    ("WHISPER_CACHE_DIR", Severity::Required),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckLine {
    pub label: String,
    pub passed: bool,
    pub severity: Severity,
}

impl CheckLine {
    fn new(label: impl Into<String>, passed: bool, severity: Severity) -> Self {
        Self {
            label: label.into(),
            passed,
            severity,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !self.passed && self.severity == Severity::Required
    }
}

impl fmt::Display for CheckLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.passed, self.severity) {
            (true, _) => write!(f, "{}✓{} {}", GREEN, RESET, self.label),
            (false, Severity::Warning) => write!(f, "{}✗{} {} (optional)", YELLOW, RESET, self.label),
            (false, Severity::Required) => write!(f, "{}✗{} {}", RED, RESET, self.label),
        }
    }
}

/// Presence check for every expected variable; empty values count as missing
pub fn env_checks<F>(lookup: F) -> Vec<CheckLine>
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VARS
        .iter()
        .map(|(name, severity)| {
            let present = lookup(name).is_some_and(|v| !v.trim().is_empty());
            let label = if present {
                format!("{} is set", name)
            } else {
                format!("{} is not set", name)
            };
            CheckLine::new(label, present, *severity)
        })
        .collect()
}

/// 1 when any required check failed, otherwise 0
pub fn exit_code(lines: &[CheckLine]) -> i32 {
    if lines.iter().any(CheckLine::is_fatal) {
        1
    } else {
        0
    }
}

async fn service_checks(config: &Config) -> Vec<CheckLine> {
    let mut lines = Vec::new();

    let database = match PgConnection::connect(&config.database.url).await {
        Ok(mut conn) => {
            let ok = sqlx::query("SELECT 1").execute(&mut conn).await.is_ok();
            let _ = conn.close().await;
            ok
        }
        Err(e) => {
            tracing::debug!("Database check failed: {}", e);
            false
        }
    };
    lines.push(CheckLine::new(
        format!("Database {} reachable", config.database.name()),
        database,
        Severity::Required,
    ));

    let storage = MediaStorage::new(config.storage.media_root.clone());
    lines.push(CheckLine::new(
        format!("Media storage {} writable", storage.root().display()),
        storage.probe().await,
        Severity::Required,
    ));

    let engine_ok = match HttpWhisperEngine::new(
        config.whisper.endpoint.clone(),
        std::time::Duration::from_secs(10),
    ) {
        Ok(engine) => engine.health().await.is_ok(),
        Err(_) => false,
    };
    lines.push(CheckLine::new(
        format!("Whisper engine {} healthy", config.whisper.endpoint),
        engine_ok,
        Severity::Required,
    ));

    lines
}

/// Print every check and return the process exit code
pub async fn run_check(config: &Config) -> i32 {
    println!("Checking environment variables...");
    let mut lines = env_checks(|key| std::env::var(key).ok());
    for line in &lines {
        println!("  {}", line);
    }

    println!("Checking services...");
    let services = service_checks(config).await;
    for line in &services {
        println!("  {}", line);
    }
    lines.extend(services);

    let code = exit_code(&lines);
    if code == 0 {
        println!("{}All required checks passed{}", GREEN, RESET);
    } else {
        println!("{}Some required checks failed{}", RED, RESET);
    }
    code
}
