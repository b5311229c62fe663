//! # Telemetry Collectors
//!
//! Destinations for flushed error records. The sink only knows the
//! [`TelemetryCollector`] trait; transport details stay in the implementations.

use crate::classification::ErrorRecord;
use crate::config::TelemetryConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Collector result type
pub type CollectorResult<T> = Result<T, CollectorError>;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Collector rejected batch: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Collector configuration error: {0}")]
    ConfigError(String),

    #[error("Collector unavailable: {0}")]
    Unavailable(String),
}

impl CollectorError {
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Whether a later attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CollectorError::HttpError(e) => e.is_timeout() || e.is_connect(),
            CollectorError::Rejected { status, .. } => *status >= 500 || *status == 429,
            CollectorError::Unavailable(_) => true,
            CollectorError::ConfigError(_) => false,
        }
    }
}

/// External destination for error records
#[async_trait]
pub trait TelemetryCollector: Send + Sync + std::fmt::Debug {
    /// Deliver one batch; an `Err` makes the sink requeue the batch once
    async fn send_batch(&self, records: &[ErrorRecord]) -> CollectorResult<()>;

    fn collector_name(&self) -> &'static str;
}

#[derive(Serialize)]
struct BatchPayload<'a> {
    service: &'a str,
    records: &'a [ErrorRecord],
}

/// POSTs batches as JSON to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: Client,
    endpoint: String,
    service_name: String,
}

impl HttpCollector {
    pub fn new(
        endpoint: impl Into<String>,
        service_name: impl Into<String>,
        timeout: Duration,
        auth_token: Option<&str>,
    ) -> CollectorResult<Self> {
        let endpoint = endpoint.into();
        let mut client_builder = Client::builder()
            .timeout(timeout)
            .user_agent(format!("resilience-core/{}", env!("CARGO_PKG_VERSION")));

        if let Some(token) = auth_token.filter(|t| !t.is_empty()) {
            let mut default_headers = reqwest::header::HeaderMap::new();
            default_headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {token}").parse().map_err(|e| {
                    CollectorError::config_error(format!("Invalid auth token: {e}"))
                })?,
            );
            client_builder = client_builder.default_headers(default_headers);
            debug!("Configured bearer token for telemetry collector");
        }

        let client = client_builder.build().map_err(|e| {
            CollectorError::config_error(format!("Failed to create HTTP client: {e}"))
        })?;

        info!(
            endpoint = %endpoint,
            timeout_ms = timeout.as_millis() as u64,
            "Created HTTP telemetry collector"
        );

        Ok(Self {
            client,
            endpoint,
            service_name: service_name.into(),
        })
    }

    /// Build from configuration; `None` when no endpoint is configured
    pub fn from_config(config: &TelemetryConfig) -> CollectorResult<Option<Self>> {
        match &config.endpoint {
            Some(endpoint) => Self::new(
                endpoint.clone(),
                config.service_name.clone(),
                config.request_timeout(),
                config.auth_token.as_deref(),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TelemetryCollector for HttpCollector {
    async fn send_batch(&self, records: &[ErrorRecord]) -> CollectorResult<()> {
        let payload = BatchPayload {
            service: &self.service_name,
            records,
        };

        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        warn!(
            endpoint = %self.endpoint,
            status = status.as_u16(),
            "Telemetry collector rejected batch"
        );
        Err(CollectorError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    fn collector_name(&self) -> &'static str {
        "http"
    }
}

/// Emits records as structured log events; used when no endpoint is configured
#[derive(Debug, Clone, Default)]
pub struct TracingCollector;

#[async_trait]
impl TelemetryCollector for TracingCollector {
    async fn send_batch(&self, records: &[ErrorRecord]) -> CollectorResult<()> {
        for record in records {
            tracing::warn!(
                target: "resilience_core::telemetry",
                error_id = %record.id(),
                error_kind = %record.kind(),
                severity = %record.severity(),
                recoverable = record.is_recoverable(),
                message = %record.message(),
                context = %serde_json::Value::Object(
                    record.context().clone().into_iter().collect()
                ),
                "ERROR_RECORD"
            );
        }
        Ok(())
    }

    fn collector_name(&self) -> &'static str {
        "tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::ErrorKind;

    #[test]
    fn test_transient_classification() {
        let rejected = CollectorError::Rejected {
            status: 503,
            message: "overloaded".to_string(),
        };
        assert!(rejected.is_transient());

        let rejected = CollectorError::Rejected {
            status: 400,
            message: "bad batch".to_string(),
        };
        assert!(!rejected.is_transient());
        assert!(!CollectorError::config_error("no endpoint").is_transient());
    }

    #[test]
    fn test_http_collector_from_config() {
        let config = TelemetryConfig::default();
        assert!(HttpCollector::from_config(&config).unwrap().is_none());

        let config = TelemetryConfig {
            endpoint: Some("http://localhost:4318/errors".to_string()),
            auth_token: Some("token-123".to_string()),
            ..Default::default()
        };
        let collector = HttpCollector::from_config(&config).unwrap().unwrap();
        assert_eq!(collector.endpoint(), "http://localhost:4318/errors");
    }

    #[tokio::test]
    async fn test_tracing_collector_accepts_batches() {
        let records = vec![ErrorRecord::new(ErrorKind::Network, "connection reset")];
        assert!(TracingCollector.send_batch(&records).await.is_ok());
    }
}
