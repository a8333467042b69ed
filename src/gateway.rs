//! Gateway transport for posting metrics records to a backend.
//!
//! Attention and interaction records go to separate endpoints. Delivery is
//! fire-and-forget from the agent's point of view: errors come back to the
//! caller, which logs and drops them.

use crate::core::MetricsRecord;
use crate::transport::{DeliveryFuture, MetricsTransport, TransportError};
use serde::Serialize;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the backend, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Optional bearer authentication token
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Create a new gateway configuration.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout: Duration::from_secs(10),
        }
    }

    /// Get the attention metrics endpoint URL.
    pub fn attention_url(&self) -> String {
        format!("{}/api/metrics/attention", self.base_url)
    }

    /// Get the interaction metrics endpoint URL.
    pub fn interaction_url(&self) -> String {
        format!("{}/api/metrics/interaction", self.base_url)
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    fn endpoint_for(&self, record: &MetricsRecord) -> String {
        match record {
            MetricsRecord::Attention(_) => self.attention_url(),
            MetricsRecord::Interaction(_) => self.interaction_url(),
        }
    }
}

/// Gateway client error types.
#[derive(Debug)]
pub enum GatewayError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Server returned an error response
    Server { status: u16, message: String },
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Config(msg) => write!(f, "Gateway config error: {msg}"),
            GatewayError::Network(msg) => write!(f, "Gateway network error: {msg}"),
            GatewayError::Server { status, message } => {
                write!(f, "Gateway server error ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for TransportError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Server { status, message } => TransportError::Rejected { status, message },
            other => TransportError::Network(other.to_string()),
        }
    }
}

/// Request body: the record plus the sending device.
#[derive(Debug, Serialize)]
struct RecordEnvelope<'a> {
    device_id: &'a str,
    #[serde(flatten)]
    record: &'a MetricsRecord,
}

/// Posts metrics records to the backend over HTTP.
#[derive(Debug, Clone)]
pub struct GatewayTransport {
    config: GatewayConfig,
    client: reqwest::Client,
    device_id: String,
}

impl GatewayTransport {
    /// Create a new gateway transport.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        if config.base_url.is_empty() {
            return Err(GatewayError::Config("Gateway URL is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {e}")))?;

        // Generate device ID from hostname + instance
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let device_id = format!(
            "engagement-{}-{}",
            hostname,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        Ok(Self {
            config,
            client,
            device_id,
        })
    }

    /// Test connection to the gateway.
    pub async fn test_connection(&self) -> Result<bool, GatewayError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Post a single record to its endpoint.
    pub async fn post_record(&self, record: &MetricsRecord) -> Result<(), GatewayError> {
        let envelope = RecordEnvelope {
            device_id: &self.device_id,
            record,
        };

        let mut request = self
            .client
            .post(self.config.endpoint_for(record))
            .json(&envelope);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Get the device ID.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl MetricsTransport for GatewayTransport {
    fn deliver<'a>(&'a self, record: &'a MetricsRecord) -> DeliveryFuture<'a> {
        Box::pin(async move { self.post_record(record).await.map_err(TransportError::from) })
    }
}
