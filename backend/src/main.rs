//! Speech2Text - API server
//!
//! Serves the HTTP API and, unless disabled, runs the transcription worker
//! in the same process.

use std::{net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;

use speech2text_backend::{connect, create_app, init_tracing, migrate, shutdown_signal, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;
    config.jwt.require_secret()?;

    init_tracing(&config.logging.format);

    tracing::info!("Starting Speech2Text server");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = connect(&config.database).await?;
    tracing::info!("Database connection established");

    if config.should_run_migrations() {
        tracing::info!("Running database migrations...");
        migrate(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::from_config(db_pool, config)?;
    let shutdown = CancellationToken::new();

    let worker_handle = if state.config.worker.enabled {
        let worker = Arc::new(state.worker());
        let token = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        tracing::info!("In-process worker disabled");
        None
    };

    // Build application
    let app = create_app(state);

    // Start server
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(handle) = worker_handle {
        handle.await??;
    }

    Ok(())
}
