//! GAM service-account access verification
//!
//! The check itself runs in a serverless function; this module only calls it.
//! - `HttpAccessVerifier` → production, POSTs to the verification function
//! - `MockAccessVerifier` → tests and `VERIFIER_BACKEND=mock`

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Access status reported by the verification function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Active,
    Invalid,
    Error,
    #[serde(other)]
    Unknown,
}

/// Verification response `{status, error?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn active() -> Self {
        Self { status: VerificationStatus::Active, error: None }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self { status: VerificationStatus::Invalid, error: Some(error.into()) }
    }

    pub fn is_active(&self) -> bool {
        self.status == VerificationStatus::Active
    }
}

/// Checks whether our service account can access a GAM network
#[async_trait]
pub trait AccessVerifier: Send + Sync {
    async fn verify_access(&self, network_code: &str) -> Result<VerificationResult>;

    /// Name of this implementation, for logs
    fn name(&self) -> &'static str;
}

// =============================================================================
// HttpAccessVerifier
// =============================================================================

const VERIFY_FUNCTION: &str = "verify-service-account-access";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    network_code: &'a str,
}

pub struct HttpAccessVerifier {
    client: Client,
    endpoint: String,
    service_key: Option<String>,
}

impl HttpAccessVerifier {
    pub fn new(functions_url: &str, service_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/{}", functions_url.trim_end_matches('/'), VERIFY_FUNCTION),
            service_key,
        })
    }
}

#[async_trait]
impl AccessVerifier for HttpAccessVerifier {
    async fn verify_access(&self, network_code: &str) -> Result<VerificationResult> {
        debug!("Verifying GAM access for network {}", network_code);

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&VerifyRequest { network_code });
        if let Some(ref key) = self.service_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach GAM verification function")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GAM verification returned error {}: {}", status, body);
        }

        response
            .json::<VerificationResult>()
            .await
            .context("Failed to parse GAM verification response")
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

// =============================================================================
// MockAccessVerifier
// =============================================================================

/// Deterministic verifier: every code is active unless configured otherwise.
#[derive(Default)]
pub struct MockAccessVerifier {
    invalid: HashSet<String>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
}

impl MockAccessVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `network_code` as lacking access
    #[cfg(test)]
    pub fn with_invalid(mut self, network_code: &str) -> Self {
        self.invalid.insert(network_code.to_string());
        self
    }

    /// Fail the call for `network_code` as if the function were unreachable
    #[cfg(test)]
    pub fn with_failure(mut self, network_code: &str) -> Self {
        self.failing.insert(network_code.to_string());
        self
    }

    /// Delay the answer for `network_code`
    #[cfg(test)]
    pub fn with_delay(mut self, network_code: &str, delay: Duration) -> Self {
        self.delays.insert(network_code.to_string(), delay);
        self
    }
}

#[async_trait]
impl AccessVerifier for MockAccessVerifier {
    async fn verify_access(&self, network_code: &str) -> Result<VerificationResult> {
        if let Some(delay) = self.delays.get(network_code) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(network_code) {
            anyhow::bail!("verification function unavailable");
        }
        if self.invalid.contains(network_code) {
            return Ok(VerificationResult::invalid(
                "Service account is not a user on this network",
            ));
        }
        Ok(VerificationResult::active())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Create the verifier selected by `VERIFIER_BACKEND`.
pub fn create_verifier(config: &Config) -> Result<Box<dyn AccessVerifier>> {
    match config.verifier_backend.as_str() {
        "mock" => {
            info!("Using MockAccessVerifier");
            Ok(Box::new(MockAccessVerifier::new()))
        }
        "http" => Ok(Box::new(HttpAccessVerifier::new(
            &config.functions_url,
            config.functions_service_key.clone(),
        )?)),
        other => {
            warn!("Unknown VERIFIER_BACKEND '{}', using http", other);
            Ok(Box::new(HttpAccessVerifier::new(
                &config.functions_url,
                config.functions_service_key.clone(),
            )?))
        }
    }
}
