//! # Resilience System
//!
//! Wires the classifier, telemetry sink, breaker manager, failure hub and retry
//! policy together from one [`ResilienceConfig`], and owns the background
//! telemetry flusher.

use crate::boundary::{ErrorBoundary, FailureHub, RetryAction, Supervised};
use crate::classification::{ErrorClassifier, ErrorRecord, StandardErrorClassifier};
use crate::config::{ConfigManager, ResilienceConfig};
use crate::error::ResilienceResult;
use crate::resilience::{CircuitBreakerManager, RetryController};
use crate::telemetry::{TelemetryCollector, TelemetryFlusherHandle, TelemetrySink};
use std::sync::Arc;
use tracing::info;

/// Shared handles to every resilience component
#[derive(Debug)]
pub struct ResilienceSystem {
    config: ResilienceConfig,
    classifier: Arc<dyn ErrorClassifier>,
    telemetry: Arc<TelemetrySink>,
    circuit_breakers: CircuitBreakerManager,
    failure_hub: Arc<FailureHub>,
    flusher: Option<TelemetryFlusherHandle>,
}

impl ResilienceSystem {
    /// Load configuration from disk and build the system
    pub fn load() -> ResilienceResult<Self> {
        let manager = ConfigManager::load()?;
        Self::from_config(manager.config().clone())
    }

    /// Build with the collector chosen by configuration
    pub fn from_config(config: ResilienceConfig) -> ResilienceResult<Self> {
        config.validate()?;
        let telemetry = TelemetrySink::from_config(&config.telemetry)?;
        Ok(Self::assemble(config, telemetry))
    }

    /// Build with an explicit collector
    pub fn with_collector(
        config: ResilienceConfig,
        collector: Arc<dyn TelemetryCollector>,
    ) -> ResilienceResult<Self> {
        config.validate()?;
        let telemetry = TelemetrySink::new(collector, &config.telemetry);
        Ok(Self::assemble(config, telemetry))
    }

    fn assemble(config: ResilienceConfig, telemetry: TelemetrySink) -> Self {
        let classifier: Arc<dyn ErrorClassifier> = Arc::new(StandardErrorClassifier::new());
        let telemetry = Arc::new(telemetry);

        let circuit_breakers =
            CircuitBreakerManager::with_classifier(&config.circuit_breakers, Arc::clone(&classifier));

        let failure_hub = Arc::new(FailureHub::new(
            Arc::clone(&classifier),
            config.boundary.report_unclaimed_failures,
        ));
        failure_hub.set_telemetry(Arc::clone(&telemetry));

        info!(
            classifier = classifier.classifier_name(),
            circuit_breakers_enabled = config.circuit_breakers.enabled,
            telemetry_enabled = config.telemetry.enabled,
            "Resilience system assembled"
        );

        Self {
            config,
            classifier,
            telemetry,
            circuit_breakers,
            failure_hub,
            flusher: None,
        }
    }

    /// Start the background telemetry flusher. Requires a tokio runtime.
    pub fn start(&mut self) {
        if self.flusher.is_none() {
            self.flusher = Some(self.telemetry.start());
        }
    }

    /// Stop the flusher after a final flush
    pub async fn shutdown(&mut self) {
        if let Some(flusher) = self.flusher.take() {
            flusher.shutdown().await;
        }
        info!("Resilience system shut down");
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn classifier(&self) -> Arc<dyn ErrorClassifier> {
        Arc::clone(&self.classifier)
    }

    pub fn telemetry(&self) -> Arc<TelemetrySink> {
        Arc::clone(&self.telemetry)
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerManager {
        &self.circuit_breakers
    }

    pub fn failure_hub(&self) -> Arc<FailureHub> {
        Arc::clone(&self.failure_hub)
    }

    /// Retry controller using the configured policy, reporting to the sink
    pub fn retry_controller(&self, operation_name: impl Into<String>) -> RetryController {
        RetryController::new(self.config.retry.to_retry_config(), Arc::clone(&self.classifier))
            .with_telemetry(Arc::clone(&self.telemetry))
            .named(operation_name)
    }

    /// Boundary sharing this system's classifier, sink and failure hub
    pub fn boundary<S, F>(&self, name: impl Into<String>, subtree: S, fallback: F) -> ErrorBoundary<S>
    where
        S: Supervised,
        F: Fn(&ErrorRecord, RetryAction) -> S::View + Send + Sync + 'static,
    {
        ErrorBoundary::new(name, subtree, fallback)
            .with_classifier(Arc::clone(&self.classifier))
            .with_telemetry(Arc::clone(&self.telemetry))
            .attach(&self.failure_hub)
    }
}
