//! # Resilience Configuration System
//!
//! Typed configuration for every resilience component. Values come from a base
//! TOML file, an optional per-environment overlay and `RESILIENCE__*` environment
//! variables, in that order of precedence (lowest first).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//!
//! let retry = manager.config().retry.to_retry_config();
//! let capacity = manager.config().telemetry.queue_capacity;
//! # let _ = (retry, capacity);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::defaults;

/// Root configuration structure mirroring `config/resilience.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry controller policy
    pub retry: RetryPolicyConfig,

    /// Circuit breaker defaults and per-dependency overrides
    pub circuit_breakers: CircuitBreakerConfig,

    /// Error telemetry sink settings
    pub telemetry: TelemetryConfig,

    /// Boundary controller settings
    pub boundary: BoundaryConfig,

    /// Structured logging settings
    pub logging: LoggingConfig,
}

impl ResilienceConfig {
    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.retry.validate()?;
        self.circuit_breakers.validate()?;
        self.telemetry.validate()?;
        Ok(())
    }
}

/// Retry policy as it appears in configuration files
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// Retries allowed after the initial attempt
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Optional ceiling on a single backoff; unset means uncapped
    pub max_delay_ms: Option<u64>,
    /// Report every failed attempt instead of only terminal failures
    pub report_each_attempt: bool,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: None,
            report_each_attempt: false,
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts > 20 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                self.max_attempts.to_string(),
                "should not exceed 20",
            ));
        }

        if self.base_delay_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                "0",
                "must be greater than 0",
            ));
        }

        if let Some(max_delay_ms) = self.max_delay_ms {
            if max_delay_ms < self.base_delay_ms {
                return Err(ConfigurationError::invalid_value(
                    "retry.max_delay_ms",
                    max_delay_ms.to_string(),
                    "must be at least retry.base_delay_ms",
                ));
            }
        }

        Ok(())
    }

    /// Convert to the retry controller's runtime format
    pub fn to_retry_config(&self) -> crate::resilience::RetryConfig {
        crate::resilience::RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: self.max_delay_ms.map(Duration::from_millis),
            report_each_attempt: self.report_each_attempt,
        }
    }
}

/// Circuit breaker configuration with per-dependency overrides
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Whether circuit breakers are enabled globally
    pub enabled: bool,

    /// Configuration for dependencies without an explicit entry
    pub default_config: CircuitBreakerComponentConfig,

    /// Specific configurations keyed by dependency identifier
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Get configuration for a specific dependency
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.default_config
            .to_resilience_config()
            .validate()
            .map_err(|e| ConfigurationError::validation_error(format!("default_config: {e}")))?;

        for (name, component) in &self.component_configs {
            component
                .to_resilience_config()
                .validate()
                .map_err(|e| ConfigurationError::validation_error(format!("{name}: {e}")))?;
        }

        Ok(())
    }
}

/// Per-dependency circuit breaker settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::CIRCUIT_FAILURE_THRESHOLD,
            reset_timeout_ms: defaults::CIRCUIT_RESET_TIMEOUT_MS,
        }
    }
}

impl CircuitBreakerComponentConfig {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }
}

/// Error telemetry sink configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub service_name: String,
    /// Maximum records held in memory before the oldest are evicted
    pub queue_capacity: usize,
    pub flush_interval_ms: u64,
    /// Queue length that triggers an early flush; also the max records per batch
    pub batch_size: usize,
    /// Number of recent records kept for local diagnostics
    pub recent_window: usize,
    /// Collector endpoint; records are logged locally when absent
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: defaults::SERVICE_NAME.to_string(),
            queue_capacity: defaults::TELEMETRY_QUEUE_CAPACITY,
            flush_interval_ms: defaults::TELEMETRY_FLUSH_INTERVAL_MS,
            batch_size: defaults::TELEMETRY_BATCH_SIZE,
            recent_window: defaults::TELEMETRY_RECENT_WINDOW,
            endpoint: None,
            auth_token: None,
            request_timeout_ms: defaults::TELEMETRY_REQUEST_TIMEOUT_MS,
        }
    }
}

impl TelemetryConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "telemetry.queue_capacity",
                "0",
                "must be greater than 0",
            ));
        }

        if self.batch_size == 0 || self.batch_size > self.queue_capacity {
            return Err(ConfigurationError::invalid_value(
                "telemetry.batch_size",
                self.batch_size.to_string(),
                "must be between 1 and telemetry.queue_capacity",
            ));
        }

        if self.flush_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "telemetry.flush_interval_ms",
                "0",
                "must be greater than 0",
            ));
        }

        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigurationError::invalid_value(
                    "telemetry.endpoint",
                    endpoint.clone(),
                    "must be an http(s) URL",
                ));
            }
        }

        Ok(())
    }
}

/// Boundary controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Report async failures that no boundary accepted
    pub report_unclaimed_failures: bool,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            report_unclaimed_failures: true,
        }
    }
}

/// Output format for the console log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Structured logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit filter directive; environment default is used when absent
    pub level: Option<String>,
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ResilienceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.telemetry.queue_capacity, 1000);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_component_config_lookup_falls_back_to_default() {
        let mut config = CircuitBreakerConfig::default();
        config.component_configs.insert(
            "payments_api".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 2,
                reset_timeout_ms: 500,
            },
        );

        assert_eq!(config.config_for_component("payments_api").failure_threshold, 2);
        assert_eq!(
            config.config_for_component("search_api"),
            config.default_config
        );
    }

    #[test]
    fn test_telemetry_validation() {
        let invalid = TelemetryConfig {
            batch_size: 2000,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = TelemetryConfig {
            endpoint: Some("collector.local:4318".to_string()),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_retry_policy_conversion() {
        let policy = RetryPolicyConfig {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: Some(2_000),
            report_each_attempt: true,
        };
        let runtime = policy.to_retry_config();
        assert_eq!(runtime.max_attempts, 4);
        assert_eq!(runtime.base_delay, Duration::from_millis(250));
        assert_eq!(runtime.max_delay, Some(Duration::from_secs(2)));
        assert!(runtime.report_each_attempt);

        let invalid = RetryPolicyConfig {
            max_delay_ms: Some(10),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
        assert_eq!(RetryPolicyConfig::default().to_retry_config().max_delay, None);
    }
}
