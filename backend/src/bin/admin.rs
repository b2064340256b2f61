//! Speech2Text - operator commands
//!
//! - `s2t-admin wait-for-db` - block until PostgreSQL accepts connections
//! - `s2t-admin backup` / `s2t-admin restore <file>` - database dumps
//! - `s2t-admin check` - deployment health check
//! - `s2t-admin init-plans` / `assign-free-subscriptions` - catalog and subscription setup
//! - `s2t-admin process-pending` / `worker` - transcription processing outside the server

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use speech2text_backend::{
    connect, init_tracing, migrate,
    ops::{backup, check, restore, wait},
    services::{PlanService, SubscriptionService},
    shutdown_signal,
    worker::ProcessOutcome,
    AppState, Config,
};

#[derive(Parser)]
#[command(name = "s2t-admin")]
#[command(about = "Operator commands for the Speech2Text service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait until the database accepts connections
    WaitForDb,
    /// Apply pending database migrations
    Migrate,
    /// Dump the database into the backup directory and prune old dumps
    Backup,
    /// Replace the database with the contents of a backup file
    Restore {
        /// Backup file produced by `backup`
        file: Option<PathBuf>,
    },
    /// Check environment variables and service reachability
    Check,
    /// Create or update the default subscription plans
    InitPlans,
    /// Give every user without a subscription the free plan
    AssignFreeSubscriptions,
    /// Run every pending transcription synchronously
    ProcessPending,
    /// Run the queue worker until interrupted
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Argument errors are reported before any configuration is read
    if let Commands::Restore { file: None } = &cli.command {
        println!("{}", restore::USAGE);
        return Ok(ExitCode::from(1));
    }

    let config = Config::load().context("loading configuration")?;
    init_tracing(&config.logging.format);

    let code = match cli.command {
        Commands::WaitForDb => {
            if wait::wait_for_db(&config.database.url, wait::MAX_ATTEMPTS, wait::RETRY_DELAY).await {
                0
            } else {
                1
            }
        }
        Commands::Migrate => {
            let db = connect(&config.database).await?;
            migrate(&db).await?;
            println!("Migrations applied");
            0
        }
        Commands::Backup => {
            backup::run_backup(&config.database.url, &config.backup.dir, config.backup.keep).await?;
            0
        }
        Commands::Restore { file } => {
            let stdin = std::io::stdin();
            restore::run_restore(
                &config.database.url,
                file.as_deref(),
                stdin.lock(),
                std::io::stdout(),
            )
            .await?
        }
        Commands::Check => check::run_check(&config).await,
        Commands::InitPlans => {
            let db = connect(&config.database).await?;
            let report = PlanService::new(db).seed_default_catalog().await?;
            for name in &report.created {
                println!("Created plan: {}", name);
            }
            for name in &report.updated {
                println!("Updated plan: {}", name);
            }
            0
        }
        Commands::AssignFreeSubscriptions => {
            let db = connect(&config.database).await?;
            let assigned = SubscriptionService::new(db).assign_free_to_all().await?;
            println!("Assigned free plan to {} users", assigned);
            0
        }
        Commands::ProcessPending => {
            let db = connect(&config.database).await?;
            let state = AppState::from_config(db, config)?;
            let reports = state.worker().process_pending().await?;
            if reports.is_empty() {
                println!("No pending transcriptions");
            }
            let mut failed = 0;
            for report in &reports {
                match &report.result {
                    Ok(ProcessOutcome::Completed { word_count, .. }) => {
                        println!("{}: completed ({} words)", report.transcription_id, word_count)
                    }
                    Ok(ProcessOutcome::AlreadyCompleted) => {
                        println!("{}: already completed", report.transcription_id)
                    }
                    Ok(ProcessOutcome::Skipped(reason)) => {
                        println!("{}: skipped ({})", report.transcription_id, reason)
                    }
                    Err(e) => {
                        failed += 1;
                        println!("{}: failed ({})", report.transcription_id, e)
                    }
                }
            }
            println!("Processed {} transcriptions, {} failed", reports.len(), failed);
            0
        }
        Commands::Worker => {
            let db = connect(&config.database).await?;
            let state = AppState::from_config(db, config)?;
            let worker = Arc::new(state.worker());
            tracing::info!(worker_id = worker.id(), "Starting standalone worker");

            let shutdown = CancellationToken::new();
            tokio::spawn(shutdown_signal(shutdown.clone()));
            worker.run(shutdown).await?;
            0
        }
    };

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
