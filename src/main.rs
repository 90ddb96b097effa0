//! Customer Worker - backend service for customer management
//!
//! Connects to NATS and PostgreSQL and serves customer CRUD plus
//! spreadsheet bulk imports. The `import` subcommand runs a single import
//! locally.

mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::db::queries::{PgCustomerStore, PgJobStore};
use crate::services::bulk_import::BulkImportService;
use crate::services::customer_service::CustomerService;
use crate::services::store::{CustomerStore, InMemoryCustomerStore, InMemoryJobStore, JobStore};

/// Interval between status polls of a local import
const IMPORT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ../logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,customer_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => {
            let pool = db::create_pool(config.require_database_url()?).await?;
            db::run_migrations(&pool).await
        }
        Command::Import { file, dry_run } => import_file(config, &file, dry_run).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting Customer Worker...");

    let pool = db::create_pool(config.require_database_url()?).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;

    let nats_client = match (&config.nats_user, &config.nats_password) {
        (Some(user), Some(password)) => async_nats::ConnectOptions::new()
            .user_and_password(user.clone(), password.clone())
            .connect(&config.nats_url)
            .await
            .context("Failed to connect to NATS")?,
        _ => async_nats::connect(&config.nats_url)
            .await
            .context("Failed to connect to NATS")?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let customer_store: Arc<dyn CustomerStore> = Arc::new(PgCustomerStore::new(pool.clone()));
    let job_store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));

    let services = handlers::Services {
        customers: Arc::new(CustomerService::new(customer_store.clone())),
        bulk_import: Arc::new(BulkImportService::new(
            customer_store,
            job_store,
            config.bulk_batch_size,
        )),
    };

    if let Err(e) = handlers::start_handlers(nats_client, services).await {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Run one import to completion and print its final status as JSON
async fn import_file(config: Config, path: &Path, dry_run: bool) -> Result<()> {
    let payload = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (customer_store, job_store): (Arc<dyn CustomerStore>, Arc<dyn JobStore>) = if dry_run {
        info!("Dry run: importing into in-memory stores");
        (Arc::new(InMemoryCustomerStore::new()), Arc::new(InMemoryJobStore::new()))
    } else {
        let pool = db::create_pool(config.require_database_url()?).await?;
        db::run_migrations(&pool).await?;
        (Arc::new(PgCustomerStore::new(pool.clone())), Arc::new(PgJobStore::new(pool)))
    };

    let service = Arc::new(BulkImportService::new(customer_store, job_store, config.bulk_batch_size));
    let submitted = service.submit(payload, &filename).await;

    if submitted.status.is_terminal() {
        println!("{}", serde_json::to_string_pretty(&submitted)?);
        anyhow::bail!("{}", submitted.message);
    }

    let status = loop {
        let status = service.status(&submitted.job_id).await?;
        if status.status.is_terminal() {
            break status;
        }
        tokio::time::sleep(IMPORT_POLL_INTERVAL).await;
    };

    println!("{}", serde_json::to_string_pretty(&status)?);
    if status.status != types::ImportJobStatus::Completed {
        anyhow::bail!("{}", status.message);
    }

    Ok(())
}
