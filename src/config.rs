//! Configuration management

use anyhow::{self, Context, Result};

use crate::services::batch_writer::DEFAULT_BATCH_SIZE;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Optional NATS credentials (both must be set)
    pub nats_user: Option<String>,
    pub nats_password: Option<String>,

    /// PostgreSQL connection string; only `import --dry-run` runs without it
    pub database_url: Option<String>,

    /// Customers written per batch during bulk imports
    pub bulk_batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let nats_url = lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let nats_user = lookup("NATS_USER").filter(|u| !u.is_empty());
        let nats_password = lookup("NATS_PASSWORD");

        let database_url = lookup("DATABASE_URL").filter(|u| !u.is_empty());

        let bulk_batch_size = match lookup("BULK_BATCH_SIZE") {
            Some(raw) => {
                let size: usize = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("BULK_BATCH_SIZE must be a positive integer, got '{}'", raw))?;
                if size == 0 {
                    anyhow::bail!("BULK_BATCH_SIZE must be greater than zero");
                }
                size
            }
            None => DEFAULT_BATCH_SIZE,
        };

        Ok(Self {
            nats_url,
            nats_user,
            nats_password,
            database_url,
            bulk_batch_size,
        })
    }

    /// Database URL for commands that need PostgreSQL
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().context("DATABASE_URL must be set")
    }
}
