//! # Resilience Module
//!
//! Wrappers that keep transient dependency failures from turning into
//! user-visible errors, and keep persistent ones from being hammered.
//!
//! ## Architecture
//!
//! - **Retry Controller**: bounded re-invocation with exponential backoff, gated
//!   on the classifier's recoverability verdict
//! - **Circuit Breakers**: fail fast against a dependency that keeps failing
//! - **Manager**: one shared breaker per dependency id
//! - **Metrics**: per-breaker and system-wide snapshots
//!
//! The two wrappers compose: retrying a breaker-protected call treats a
//! rejection as a recoverable `Network` failure.
//!
//! ## Usage
//!
//! ```rust
//! use resilience_core::classification::CausedError;
//! use resilience_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     reset_timeout: Duration::from_secs(30),
//! };
//!
//! let breaker = CircuitBreaker::new("payments_api".to_string(), config);
//!
//! let receipt = breaker
//!     .execute(|| async { Ok::<_, CausedError>("receipt-42") })
//!     .await
//!     .unwrap();
//! assert_eq!(receipt, "receipt-42");
//! # });
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitOpenError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use retry::{
    with_retry, CancellationHandle, RetryConfig, RetryController, RetryError, RetryState,
    RetryingOperation,
};
