//! AdOps Worker - Backend service for publisher onboarding
//!
//! This worker connects to NATS and handles bulk publisher uploads, GAM status
//! changes and the post-onboarding data fetch queue.

mod auth;
mod cli;
mod config;
mod db;
mod error;
mod handlers;
mod services;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use cli::{Cli, Command};
use config::Config;
use services::bulk_upload::UploadContext;
use services::queue_worker::ProcessOutcome;
use services::store::PgStore;
use services::Services;
use types::BulkUploadProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR")
        .unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        &logs_dir,
        "adops-worker.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,adops_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())  // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))  // file
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Migrate => {
            let config = Config::from_env()?;
            let pool = db::create_pool(&config.database_url).await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations complete");
            Ok(())
        }
        Command::Template { output } => {
            let template = services::csv_parser::upload_template()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &template.content)
                        .with_context(|| format!("Failed to write template to {}", path.display()))?;
                    info!("Template written to {}", path.display());
                }
                None => print!("{}", template.content),
            }
            Ok(())
        }
        Command::Upload { file, user_id, partner_id, default_parent_id } => {
            let csv_content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let services = connect_services().await?;
            let context = UploadContext { user_id, partner_id, default_parent_id };
            let on_progress = |progress: BulkUploadProgress| {
                info!(
                    "[{:?}] {}/{} {}",
                    progress.phase, progress.current, progress.total, progress.current_publisher
                );
            };
            let result = services.uploader.run_csv(&csv_content, &context, &on_progress).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Enqueue { publisher_ids } => {
            let services = connect_services().await?;
            let result = services.queue.queue_publishers(&publisher_ids).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Token { user_id, email, role, partner_id } => {
            let role = types::UserRole::from_str(&role)
                .with_context(|| format!("Unknown role '{}'", role))?;
            let config = Config::from_env()?;
            let token = auth::generate_token(user_id, &email, role, partner_id, &config.jwt_secret)?;
            println!("{}", token);
            Ok(())
        }
        Command::QueueStatus => {
            let services = connect_services().await?;
            let status = services.queue.get_queue_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::ProcessQueue { once } => {
            let services = connect_services().await?;
            loop {
                let outcome = services.worker.process_next().await?;
                println!("{}", serde_json::to_string(&outcome)?);
                // Failed items go back to pending; leave the retry to a later run
                if once || !matches!(outcome, ProcessOutcome::Completed { .. }) {
                    break;
                }
            }
            Ok(())
        }
    }
}

async fn connect_services() -> Result<Services> {
    let config = Config::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    Services::new(Arc::new(PgStore::new(pool)), &config)
}

async fn serve() -> Result<()> {
    info!("Starting AdOps Worker...");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");

    // Connect to database
    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    // Run migrations
    db::run_migrations(&pool).await?;
    info!("Database migrations complete");

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    // Start message handlers
    let handler_result = handlers::start_handlers(nats_client, pool, &config).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}
