//! New publisher setup (historical report fetch + site audit)
//!
//! The heavy lifting runs in a serverless function; the queue worker
//! triggers it once per queue item.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;

/// Months of history fetched for a new publisher
pub const HISTORICAL_MONTHS: u32 = 2;

const SETUP_FUNCTION: &str = "new-pub-report-and-audit";

#[async_trait]
pub trait PublisherSetup: Send + Sync {
    async fn run_setup(&self, publisher_id: Uuid) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupRequest {
    publisher_id: Uuid,
    fetch_historical: bool,
    historical_months: u32,
}

pub struct HttpPublisherSetup {
    client: Client,
    endpoint: String,
    service_key: Option<String>,
}

impl HttpPublisherSetup {
    pub fn new(functions_url: &str, service_key: Option<String>) -> Result<Self> {
        // Report fetches for two months of data take a while
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/{}", functions_url.trim_end_matches('/'), SETUP_FUNCTION),
            service_key,
        })
    }
}

#[async_trait]
impl PublisherSetup for HttpPublisherSetup {
    async fn run_setup(&self, publisher_id: Uuid) -> Result<()> {
        debug!("Triggering setup for publisher {}", publisher_id);

        let mut request = self.client.post(&self.endpoint).json(&SetupRequest {
            publisher_id,
            fetch_historical: true,
            historical_months: HISTORICAL_MONTHS,
        });
        if let Some(ref key) = self.service_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach publisher setup function")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Setup failed with status {}: {}", status, body);
        }
        Ok(())
    }
}

/// Records calls; fails for configured publishers
#[derive(Default)]
pub struct MockPublisherSetup {
    failing: HashSet<Uuid>,
    calls: Mutex<Vec<Uuid>>,
}

impl MockPublisherSetup {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_failure(mut self, publisher_id: Uuid) -> Self {
        self.failing.insert(publisher_id);
        self
    }

    #[cfg(test)]
    pub fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PublisherSetup for MockPublisherSetup {
    async fn run_setup(&self, publisher_id: Uuid) -> Result<()> {
        self.calls.lock().push(publisher_id);
        if self.failing.contains(&publisher_id) {
            anyhow::bail!("Setup failed with status 500: report API unavailable");
        }
        Ok(())
    }
}

/// Pairs with the verifier: `VERIFIER_BACKEND=mock` stubs every serverless call.
pub fn create_publisher_setup(config: &Config) -> Result<Box<dyn PublisherSetup>> {
    if config.verifier_backend == "mock" {
        info!("Using MockPublisherSetup");
        return Ok(Box::new(MockPublisherSetup::new()));
    }
    Ok(Box::new(HttpPublisherSetup::new(
        &config.functions_url,
        config.functions_service_key.clone(),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_request_uses_camel_case() {
        let request = SetupRequest {
            publisher_id: Uuid::nil(),
            fetch_historical: true,
            historical_months: HISTORICAL_MONTHS,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["fetchHistorical"], true);
        assert_eq!(json["historicalMonths"], 2);
        assert!(json.get("publisherId").is_some());
    }

    #[test]
    fn endpoint_joins_function_name() {
        let setup = HttpPublisherSetup::new("http://localhost:54321/functions/v1", None).unwrap();
        assert_eq!(setup.endpoint, "http://localhost:54321/functions/v1/new-pub-report-and-audit");
    }

    #[tokio::test]
    async fn mock_records_calls_and_fails_configured_publishers() {
        let failing = Uuid::new_v4();
        let setup = MockPublisherSetup::new().with_failure(failing);
        assert!(setup.run_setup(Uuid::new_v4()).await.is_ok());
        assert!(setup.run_setup(failing).await.is_err());
        assert_eq!(setup.calls().len(), 2);
    }
}
