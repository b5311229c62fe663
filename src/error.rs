//! Error types for the resilience core.
//!

use crate::config::ConfigurationError;
use crate::resilience::{CircuitOpenError, RetryError};
use crate::telemetry::CollectorError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Telemetry error: {0}")]
    TelemetryError(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("Retry limit exceeded for {operation} after {attempts} attempts")]
    RetryLimitExceeded { operation: String, attempts: u32 },
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ConfigurationError> for ResilienceError {
    fn from(error: ConfigurationError) -> Self {
        match error {
            ConfigurationError::ValidationError { .. } | ConfigurationError::InvalidValue { .. } => {
                ResilienceError::InvalidConfiguration(error.to_string())
            }
            other => ResilienceError::ConfigurationError(other.to_string()),
        }
    }
}

impl From<CircuitOpenError> for ResilienceError {
    fn from(error: CircuitOpenError) -> Self {
        ResilienceError::CircuitBreakerOpen(error.dependency)
    }
}

impl From<CollectorError> for ResilienceError {
    fn from(error: CollectorError) -> Self {
        ResilienceError::TelemetryError(error.to_string())
    }
}

impl ResilienceError {
    /// Flatten a retry outcome for callers that only need the crate error
    pub fn from_retry<E: std::fmt::Display>(operation: &str, error: RetryError<E>) -> Self {
        match error {
            RetryError::Exhausted { attempts, .. } => ResilienceError::RetryLimitExceeded {
                operation: operation.to_string(),
                attempts,
            },
            RetryError::Cancelled { attempts } => {
                ResilienceError::Cancelled(format!("{operation} after {attempts} attempts"))
            }
            RetryError::NonRecoverable { record, source } => {
                ResilienceError::Internal(format!("{operation} failed ({}): {source}", record.kind()))
            }
        }
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(error: serde_json::Error) -> Self {
        ResilienceError::TelemetryError(format!("JSON serialization error: {error}"))
    }
}

pub type ResilienceResult<T> = anyhow::Result<T, ResilienceError>;
