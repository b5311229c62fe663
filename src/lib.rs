#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Resilience Core
//!
//! Failure containment for applications that call unreliable dependencies.
//!
//! ## Overview
//!
//! A single failing dependency should not take down a whole application. This
//! crate classifies failures, retries the ones worth retrying, stops calling
//! dependencies that keep failing, reports everything to an error collector and
//! contains whatever still escapes behind supervision boundaries.
//!
//! ## Module Organization
//!
//! - [`classification`] - Failure taxonomy and the classifier every component consults
//! - [`resilience`] - Retry controller, circuit breakers and their manager
//! - [`telemetry`] - Bounded, batching error sink and collectors
//! - [`boundary`] - Error boundaries and the process-wide failure hub
//! - [`system`] - One-stop wiring from configuration
//! - [`config`] - TOML + environment configuration
//! - [`logging`] - Structured logging setup and domain helpers
//! - [`error`] - Crate error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilience_core::classification::CausedError;
//! use resilience_core::config::ResilienceConfig;
//! use resilience_core::system::ResilienceSystem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! resilience_core::logging::init_structured_logging();
//!
//! let mut system = ResilienceSystem::from_config(ResilienceConfig::default())?;
//! system.start();
//!
//! let breaker = system.circuit_breakers().get_circuit_breaker("feed_api");
//! let feed = system
//!     .retry_controller("load_feed")
//!     .execute(|| breaker.execute(|| async { Ok::<_, CausedError>(vec!["post-1"]) }))
//!     .await?;
//!
//! println!("loaded {} posts", feed.len());
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod classification;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod resilience;
pub mod system;
pub mod telemetry;

pub use boundary::{ErrorBoundary, FailureHub, RetryAction, Supervised};
pub use classification::{
    CausedError, ErrorClassifier, ErrorContext, ErrorKind, ErrorRecord, ErrorSeverity, Failure,
    StandardErrorClassifier,
};
pub use config::{ConfigManager, ResilienceConfig};
pub use error::{ResilienceError, ResilienceResult};
pub use resilience::{
    with_retry, CircuitBreaker, CircuitBreakerError, CircuitBreakerManager, RetryConfig,
    RetryController, RetryError,
};
pub use system::ResilienceSystem;
pub use telemetry::{TelemetryCollector, TelemetrySink};
