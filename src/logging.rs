//! # Structured Logging Module
//!
//! Environment-aware console logging using the tracing ecosystem, plus
//! domain helpers that give every resilience event the same field layout.

use crate::classification::ErrorKind;
use crate::config::{ConfigManager, LogFormat, LoggingConfig};
use crate::resilience::CircuitState;
use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console logging with environment defaults
pub fn init_structured_logging() {
    init_with_config(&LoggingConfig::default());
}

/// Initialize console logging. Idempotent; an already-installed global
/// subscriber is left in place.
pub fn init_with_config(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let log_level = resolve_log_level(
            std::env::var("RUST_LOG").ok(),
            config.level.as_deref(),
            &environment,
        );
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(false)
                .with_filter(EnvFilter::new(&log_level))
                .boxed(),
        };

        let subscriber = tracing_subscriber::registry().with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                log_level = %log_level,
                format = ?config.format,
                ansi_colors = use_ansi,
                "Structured logging initialized"
            );
        }
    });
}

/// `RUST_LOG` wins, then the configured level, then the environment default
fn resolve_log_level(rust_log: Option<String>, configured: Option<&str>, environment: &str) -> String {
    if let Some(level) = rust_log.filter(|l| !l.is_empty()) {
        return level.to_lowercase();
    }

    if let Some(level) = configured {
        return level.to_lowercase();
    }

    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a scheduled retry
pub fn log_retry_attempt(
    operation: &str,
    retry: u32,
    max_attempts: u32,
    delay: Duration,
    error_kind: ErrorKind,
) {
    tracing::info!(
        operation = %operation,
        retry = retry,
        max_attempts = max_attempts,
        delay_ms = delay.as_millis() as u64,
        error_kind = %error_kind,
        "RETRY_SCHEDULED"
    );
}

/// Log a circuit state change; called only by the caller that won the transition
pub fn log_circuit_transition(
    dependency: &str,
    from: CircuitState,
    to: CircuitState,
    failure_count: u32,
) {
    match to {
        CircuitState::Open => tracing::warn!(
            dependency = %dependency,
            from_state = %from,
            to_state = %to,
            failure_count = failure_count,
            "CIRCUIT_TRANSITION"
        ),
        CircuitState::Closed | CircuitState::HalfOpen => tracing::info!(
            dependency = %dependency,
            from_state = %from,
            to_state = %to,
            failure_count = failure_count,
            "CIRCUIT_TRANSITION"
        ),
    }
}

/// Log a boundary lifecycle event
pub fn log_boundary_event(boundary: &str, event: &str, details: Option<&str>) {
    tracing::debug!(
        boundary = %boundary,
        event = %event,
        details = details,
        "BOUNDARY_EVENT"
    );
}

/// Log the outcome of one telemetry flush
pub fn log_telemetry_flush(collector: &str, delivered: usize, requeued: usize, dropped: usize) {
    if requeued > 0 || dropped > 0 {
        tracing::warn!(
            collector = %collector,
            delivered = delivered,
            requeued = requeued,
            dropped = dropped,
            "TELEMETRY_FLUSH"
        );
    } else {
        tracing::debug!(
            collector = %collector,
            delivered = delivered,
            "TELEMETRY_FLUSH"
        );
    }
}

/// Generic error logging with unified format
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR: {} failed in {}: {}", operation, component, error
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_resolution() {
        assert_eq!(resolve_log_level(None, None, "test"), "debug");
        assert_eq!(resolve_log_level(None, None, "development"), "debug");
        assert_eq!(resolve_log_level(None, None, "production"), "info");

        assert_eq!(resolve_log_level(None, Some("WARN"), "production"), "warn");
        assert_eq!(
            resolve_log_level(Some("resilience_core=trace".to_string()), Some("warn"), "test"),
            "resilience_core=trace"
        );
        assert_eq!(resolve_log_level(Some(String::new()), Some("warn"), "test"), "warn");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_with_config(&LoggingConfig {
            level: Some("info".to_string()),
            format: LogFormat::Json,
        });
        log_boundary_event("Settings", "created", None);
    }
}
