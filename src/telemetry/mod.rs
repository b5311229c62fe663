//! # Telemetry Module
//!
//! Error telemetry: a bounded, batching sink and the collectors it delivers to.
//!
//! ## Usage
//!
//! ```rust
//! use resilience_core::classification::{ErrorKind, ErrorRecord};
//! use resilience_core::config::TelemetryConfig;
//! use resilience_core::telemetry::TelemetrySink;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let sink = Arc::new(TelemetrySink::from_config(&TelemetryConfig::default()).unwrap());
//! let flusher = sink.start();
//!
//! sink.report(ErrorRecord::new(ErrorKind::Network, "connection reset"));
//!
//! // shutdown performs a final flush
//! flusher.shutdown().await;
//! assert_eq!(sink.queue_len(), 0);
//! # });
//! ```

pub mod collector;
pub mod diagnostics;
pub mod sink;

pub use collector::{
    CollectorError, CollectorResult, HttpCollector, TelemetryCollector, TracingCollector,
};
pub use diagnostics::TelemetryDiagnostics;
pub use sink::{FlushOutcome, TelemetryFlusherHandle, TelemetrySink};
