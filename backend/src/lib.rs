//! Speech2Text backend
//!
//! HTTP API, background transcription worker and operator tooling for a
//! subscription-based speech-to-text service.

use std::{sync::Arc, time::Duration};

use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod error;
pub mod external;
pub mod handlers;
pub mod middleware;
pub mod ops;
pub mod routes;
pub mod services;
pub mod storage;
pub mod worker;

pub use config::Config;

use config::DatabaseConfig;
use external::{
    prepare_cache_dir, DiarizationEngine, Ffmpeg, HttpDiarizationEngine, HttpWhisperEngine,
    TranscriptionEngine,
};
use services::{QueueService, TranscriptionService};
use storage::MediaStorage;
use worker::{Pipeline, Worker};

const DEFAULT_LOG_FILTER: &str =
    "s2t_server=debug,s2t_admin=debug,speech2text_backend=debug,tower_http=debug,sqlx=warn";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    pub storage: MediaStorage,
    pub ffmpeg: Ffmpeg,
    pub engine: Arc<dyn TranscriptionEngine>,
    pub diarizer: Option<Arc<dyn DiarizationEngine>>,
}

impl AppState {
    /// Build the state and engine clients from configuration
    pub fn from_config(db: sqlx::PgPool, config: Config) -> anyhow::Result<Self> {
        let cache_dir = prepare_cache_dir(&config.whisper.cache_dir);
        tracing::info!("Whisper model cache: {}", cache_dir.display());

        let engine = HttpWhisperEngine::new(
            config.whisper.endpoint.clone(),
            Duration::from_secs(config.whisper.request_timeout_secs),
        )?;

        let diarizer: Option<Arc<dyn DiarizationEngine>> = match &config.diarization.endpoint {
            Some(endpoint) => Some(Arc::new(HttpDiarizationEngine::new(
                endpoint.clone(),
                config.diarization.auth_token.clone(),
                Duration::from_secs(config.diarization.request_timeout_secs),
            )?)),
            None => {
                tracing::warn!("Speaker diarization is not configured");
                None
            }
        };

        Ok(Self {
            db,
            storage: MediaStorage::new(config.storage.media_root.clone()),
            ffmpeg: Ffmpeg::new(
                config.ffmpeg.ffmpeg_path.clone(),
                config.ffmpeg.ffprobe_path.clone(),
            ),
            engine: Arc::new(engine),
            diarizer,
            config: Arc::new(config),
        })
    }

    pub fn transcriptions(&self) -> TranscriptionService {
        TranscriptionService::new(self.db.clone(), self.storage.clone(), self.ffmpeg.clone())
    }

    /// A queue worker over this state's database and engines
    pub fn worker(&self) -> Worker {
        let pipeline = Pipeline::new(
            self.transcriptions(),
            Arc::clone(&self.engine),
            self.ffmpeg.clone(),
        );
        Worker::new(
            self.config.worker.clone(),
            QueueService::new(self.db.clone()),
            pipeline,
        )
    }
}

/// Install the global tracing subscriber; `json` selects JSON lines output
pub fn init_tracing(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Open the connection pool
pub async fn connect(database: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(database.max_connections)
        .min_connections(database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&database.url)
        .await
}

/// Apply pending migrations
pub async fn migrate(db: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(db).await
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Speech2Text API v1"
}

/// Resolve when SIGTERM or Ctrl+C arrives, cancelling `token`
pub async fn shutdown_signal(token: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down gracefully..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down gracefully..."),
        _ = token.cancelled() => {}
    }
    token.cancel();
}
