//! Configuration management

use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::services::bulk_upload::UploadSettings;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// JWT secret key for token validation
    pub jwt_secret: String,

    /// Base URL of the serverless functions (verification, publisher setup)
    pub functions_url: String,

    /// Bearer key sent to the serverless functions
    pub functions_service_key: Option<String>,

    /// `http` or `mock`
    pub verifier_backend: String,

    pub verify_timeout: Duration,

    /// Rows verified in parallel during an upload (1 = sequential)
    pub verify_concurrency: usize,

    pub queue_poll_interval: Duration,

    /// Processing items older than this are put back to pending. Off when unset.
    pub queue_lease: Option<Duration>,
}

const KNOWN_DEV_SECRETS: &[&str] = &["dev-secret-change-in-production-min-32-bytes!!"];

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let nats_url = var("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let jwt_secret = var("JWT_SECRET")
            .context("JWT_SECRET must be set, generate one with: openssl rand -base64 48")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET must be at least 32 bytes (current: {} bytes). Generate one with: openssl rand -base64 48",
                jwt_secret.len()
            );
        }
        if KNOWN_DEV_SECRETS.contains(&jwt_secret.as_str()) {
            tracing::warn!("JWT_SECRET matches a known default, change it for production!");
        }

        let functions_url = var("FUNCTIONS_URL")
            .unwrap_or_else(|| "http://localhost:54321/functions/v1".to_string());
        let functions_service_key = var("FUNCTIONS_SERVICE_KEY").filter(|k| !k.is_empty());

        let verifier_backend = var("VERIFIER_BACKEND")
            .map(|b| b.trim().to_lowercase())
            .unwrap_or_else(|| "http".to_string());

        let verify_timeout = Duration::from_secs(parse_or(&var, "VERIFY_TIMEOUT_SECS", 15)?);
        let verify_concurrency = parse_or(&var, "VERIFY_CONCURRENCY", 1usize)?.max(1);
        let queue_poll_interval = Duration::from_secs(parse_or(&var, "QUEUE_POLL_INTERVAL_SECS", 30)?);
        let queue_lease = var("QUEUE_LEASE_SECS")
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("QUEUE_LEASE_SECS must be a number of seconds, got '{}'", v))
            })
            .transpose()?
            .map(Duration::from_secs);

        Ok(Self {
            nats_url,
            database_url,
            jwt_secret,
            functions_url,
            functions_service_key,
            verifier_backend,
            verify_timeout,
            verify_concurrency,
            queue_poll_interval,
            queue_lease,
        })
    }

    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            verify_concurrency: self.verify_concurrency,
            verify_timeout: self.verify_timeout,
        }
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, value)),
        None => Ok(default),
    }
}
