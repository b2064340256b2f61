//! Configuration management for the Speech2Text service
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code (including the legacy DB_*, SECRET_KEY and
//!    WHISPER_CACHE_DIR variables used by the deployment scripts)
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with S2T_ prefix

use std::path::PathBuf;

use config::{ConfigError, Environment, File};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;

/// Everything but RFC 3986 unreserved characters is escaped in URL credentials
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub whisper: WhisperConfig,
    pub diarization: DiarizationConfig,
    pub ffmpeg: FfmpegConfig,
    pub backup: BackupConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Apply migrations on startup even outside development
    pub run_migrations: bool,
}

impl DatabaseConfig {
    /// Database name taken from the last path segment of the URL
    pub fn name(&self) -> &str {
        database_name_from_url(&self.url)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key for signing JWT tokens; only the API server needs one
    pub secret: Option<String>,

    /// Access token expiration in seconds
    pub access_token_expiry: i64,

    /// Refresh token expiration in seconds
    pub refresh_token_expiry: i64,
}

impl JwtConfig {
    /// The signing secret, if one is configured
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }

    /// The signing secret, or an error naming the variables that set it
    pub fn require_secret(&self) -> Result<&str, ConfigError> {
        self.signing_secret().ok_or_else(|| {
            ConfigError::Message(
                "JWT secret is not set; provide SECRET_KEY or S2T__JWT__SECRET".to_string(),
            )
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for uploaded media
    pub media_root: PathBuf,

    /// Request body ceiling for superusers
    pub superuser_max_upload_bytes: u64,

    /// Request body ceiling for everyone else
    pub default_max_upload_bytes: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Run the transcription worker inside the server process
    pub enabled: bool,

    /// Jobs processed at the same time
    pub concurrency: usize,

    /// Idle sleep between queue polls
    pub poll_interval_ms: u64,

    pub max_retries: i32,
    pub retry_backoff_secs: u64,
    pub retry_backoff_max_secs: u64,

    /// Hard limit for a single job
    pub time_limit_secs: u64,

    /// Claimed jobs older than this are handed out again
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WhisperConfig {
    /// Base URL of the Whisper inference server
    pub endpoint: String,

    /// Model cache directory shared with the inference server
    pub cache_dir: PathBuf,

    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiarizationConfig {
    /// Base URL of the diarization server; disabled when unset
    pub endpoint: Option<String>,

    pub auth_token: Option<String>,

    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub keep: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `pretty` or `json`
    pub format: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("S2T_ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let mut builder = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 8000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", legacy_database_url(env))?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.run_migrations", false)?
            .set_default("jwt.access_token_expiry", 3600)?
            .set_default("jwt.refresh_token_expiry", 604800)?
            .set_default("storage.media_root", "media")?
            .set_default("storage.superuser_max_upload_bytes", 10_u64 * 1024 * 1024 * 1024)?
            .set_default("storage.default_max_upload_bytes", 30_u64 * 1024 * 1024)?
            .set_default("worker.enabled", true)?
            .set_default("worker.concurrency", 1)?
            .set_default("worker.poll_interval_ms", 2000)?
            .set_default("worker.max_retries", 3)?
            .set_default("worker.retry_backoff_secs", 60)?
            .set_default("worker.retry_backoff_max_secs", 300)?
            .set_default("worker.time_limit_secs", 3600)?
            .set_default("worker.visibility_timeout_secs", 43200)?
            .set_default("whisper.endpoint", "http://whisper:9000")?
            .set_default(
                "whisper.cache_dir",
                env("WHISPER_CACHE_DIR").unwrap_or_else(|| "/tmp/whisper-cache".into()),
            )?
            .set_default("whisper.request_timeout_secs", 3600)?
            .set_default("diarization.request_timeout_secs", 1800)?
            .set_default("ffmpeg.ffmpeg_path", "ffmpeg")?
            .set_default("ffmpeg.ffprobe_path", "ffprobe")?
            .set_default("backup.dir", "backups")?
            .set_default("backup.keep", 10)?
            .set_default("logging.format", "pretty")?;

        if let Some(secret) = env("SECRET_KEY") {
            builder = builder.set_default("jwt.secret", secret)?;
        }

        let config = builder
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (S2T_ prefix)
            .add_source(
                Environment::with_prefix("S2T")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn should_run_migrations(&self) -> bool {
        self.is_development() || self.database.run_migrations
    }
}

/// Compose a PostgreSQL URL from the DB_* variables the deployment scripts use.
/// User and password are percent-encoded so any character survives.
pub fn legacy_database_url<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
    let user = get("DB_USER", "postgres");
    let password = get("DB_PASSWORD", "postgres");
    format!(
        "postgres://{}:{}@{}:{}/{}",
        utf8_percent_encode(&user, USERINFO),
        utf8_percent_encode(&password, USERINFO),
        get("DB_HOST", "db"),
        get("DB_PORT", "5432"),
        get("DB_NAME", "speech2text"),
    )
}

pub fn database_name_from_url(url: &str) -> &str {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query.rsplit('/').next().unwrap_or(without_query)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
        }
    }
}
