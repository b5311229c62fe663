//! # Circuit Breaker Manager
//!
//! One breaker per dependency id, created lazily and shared by every caller
//! that talks to that dependency. Provides centralized control and metrics
//! aggregation.

use crate::classification::{ErrorClassifier, StandardErrorClassifier};
use crate::config::{CircuitBreakerComponentConfig, CircuitBreakerConfig};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitState, SystemCircuitBreakerMetrics,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Manager for circuit breakers across dependencies
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    circuit_breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
    classifier: Arc<dyn ErrorClassifier>,
}

impl CircuitBreakerManager {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::with_classifier(config, Arc::new(StandardErrorClassifier::new()))
    }

    pub fn with_classifier(
        config: &CircuitBreakerConfig,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        info!(
            enabled = config.enabled,
            component_overrides = config.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(DashMap::new()),
            config: config.clone(),
            classifier,
        }
    }

    /// Get or create the circuit breaker for a dependency
    pub fn get_circuit_breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.get(dependency) {
            return Arc::clone(breaker.value());
        }

        // entry() holds the shard lock, so concurrent callers share one breaker
        self.circuit_breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                let component_config = self
                    .config
                    .config_for_component(dependency)
                    .to_resilience_config();
                info!(dependency = dependency, "Created new circuit breaker");
                Arc::new(
                    CircuitBreaker::with_classifier(
                        dependency.to_string(),
                        component_config,
                        Arc::clone(&self.classifier),
                    )
                    .with_enabled(self.config.enabled),
                )
            })
            .value()
            .clone()
    }

    /// Get all dependency ids with a breaker
    pub fn list_components(&self) -> Vec<String> {
        self.circuit_breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn get_component_metrics(&self, dependency: &str) -> Option<CircuitBreakerMetrics> {
        self.circuit_breakers
            .get(dependency)
            .map(|breaker| breaker.metrics())
    }

    /// Get system-wide circuit breaker metrics
    pub fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();
        for entry in self.circuit_breakers.iter() {
            system_metrics.insert(entry.key().clone(), entry.value().metrics());
        }
        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed (emergency recovery)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_closed();
        }
    }

    pub fn remove_circuit_breaker(&self, dependency: &str) -> bool {
        if self.circuit_breakers.remove(dependency).is_some() {
            info!(
                dependency = dependency,
                remaining_count = self.circuit_breakers.len(),
                "Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }

    pub fn get_state_summary(&self) -> HashMap<CircuitState, usize> {
        self.get_system_metrics().count_by_state()
    }

    /// Check overall system health based on circuit breaker states
    pub fn system_health_score(&self) -> f64 {
        self.get_system_metrics().health_score()
    }

    /// Update configuration for a dependency; applies to breakers created afterwards
    pub fn update_component_config(
        &mut self,
        dependency: &str,
        config: CircuitBreakerComponentConfig,
    ) {
        self.config
            .component_configs
            .insert(dependency.to_string(), config);

        info!(
            dependency = dependency,
            "Updated circuit breaker configuration (applies to new instances)"
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn create_test_config() -> CircuitBreakerConfig {
        let mut config = CircuitBreakerConfig::default();
        config.component_configs.insert(
            "payments_api".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 2,
                reset_timeout_ms: 1_000,
            },
        );
        config
    }

    #[tokio::test]
    async fn test_circuit_breaker_manager_creation() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());

        assert!(manager.list_components().is_empty());
        assert_eq!(manager.system_health_score(), 1.0);
    }

    #[tokio::test]
    async fn test_get_or_create_circuit_breaker() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());

        let breaker1 = manager.get_circuit_breaker("feed_api");
        let breaker2 = manager.get_circuit_breaker("feed_api");
        assert!(Arc::ptr_eq(&breaker1, &breaker2));
        assert_eq!(breaker1.config().failure_threshold, 5);

        let payments = manager.get_circuit_breaker("payments_api");
        assert_eq!(payments.config().failure_threshold, 2);
        assert_eq!(payments.config().reset_timeout, Duration::from_secs(1));

        assert_eq!(manager.list_components().len(), 2);
    }

    #[tokio::test]
    async fn test_system_metrics_and_force_controls() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());
        let _feed = manager.get_circuit_breaker("feed_api");
        let _search = manager.get_circuit_breaker("search_api");

        let summary = manager.get_state_summary();
        assert_eq!(summary.get(&CircuitState::Closed), Some(&2));

        manager.force_open_all();
        assert_eq!(manager.get_state_summary().get(&CircuitState::Open), Some(&2));
        assert_eq!(manager.system_health_score(), 0.0);

        manager.force_close_all();
        assert_eq!(manager.system_health_score(), 1.0);

        assert!(manager.remove_circuit_breaker("search_api"));
        assert!(!manager.remove_circuit_breaker("search_api"));
    }

    #[tokio::test]
    async fn test_disabled_manager_hands_out_pass_through_breakers() {
        let config = CircuitBreakerConfig {
            enabled: false,
            ..create_test_config()
        };
        let manager = CircuitBreakerManager::from_config(&config);

        assert!(!manager.is_enabled());
        assert!(!manager.get_circuit_breaker("payments_api").is_enabled());
    }
}
