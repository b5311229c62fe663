//! # Circuit Breaker Metrics
//!
//! Snapshots taken from a breaker's atomic counters. A per-dependency view
//! answers "is this dependency hurting us and how", the system view rolls
//! every dependency up into one health score.

use crate::classification::ErrorKind;
use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Invoked calls needed before the failure rate counts against health
const MIN_HEALTH_SAMPLE: u64 = 10;
const MAX_HEALTHY_FAILURE_RATE: f64 = 0.1;

/// Snapshot of one breaker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub current_state: CircuitState,

    /// Calls that reached the wrapped operation
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,

    /// Calls turned away without invoking the operation
    pub rejected_count: u64,

    pub consecutive_failures: u32,

    /// Failures grouped by classified kind; kinds never seen are absent
    pub failures_by_kind: HashMap<ErrorKind, u64>,

    /// Mean duration over every invoked call
    pub mean_latency: Duration,
}

impl CircuitBreakerMetrics {
    /// Share of invoked calls that failed
    pub fn failure_rate(&self) -> f64 {
        ratio(self.failure_count, self.total_calls)
    }

    /// Share of all attempted calls that were rejected
    pub fn rejection_rate(&self) -> f64 {
        ratio(self.rejected_count, self.total_calls + self.rejected_count)
    }

    /// Most frequent failure kind, ties broken by taxonomy order
    pub fn dominant_failure_kind(&self) -> Option<ErrorKind> {
        ErrorKind::ALL
            .iter()
            .filter_map(|kind| self.failures_by_kind.get(kind).map(|count| (*kind, *count)))
            .fold(None, |best: Option<(ErrorKind, u64)>, (kind, count)| match best {
                Some((_, top)) if top >= count => best,
                _ => Some((kind, count)),
            })
            .map(|(kind, _)| kind)
    }

    /// Closed, and either too few calls to judge or failing rarely
    pub fn is_healthy(&self) -> bool {
        self.current_state == CircuitState::Closed
            && (self.total_calls < MIN_HEALTH_SAMPLE
                || self.failure_rate() < MAX_HEALTHY_FAILURE_RATE)
    }

    /// Contribution to the system score: full when healthy, half while probing
    fn health_weight(&self) -> f64 {
        match self.current_state {
            CircuitState::Open => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Closed if self.is_healthy() => 1.0,
            CircuitState::Closed => 0.5,
        }
    }
}

/// Every breaker the manager knows about, keyed by dependency id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub dependencies: BTreeMap<String, CircuitBreakerMetrics>,
    pub collected_at: chrono::DateTime<chrono::Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            dependencies: BTreeMap::new(),
            collected_at: chrono::Utc::now(),
        }
    }

    pub fn insert(&mut self, dependency: String, metrics: CircuitBreakerMetrics) {
        self.dependencies.insert(dependency, metrics);
    }

    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for metrics in self.dependencies.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }
        counts
    }

    /// Dependencies currently failing fast, in id order
    pub fn open_dependencies(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|(_, metrics)| metrics.current_state == CircuitState::Open)
            .map(|(dependency, _)| dependency.as_str())
            .collect()
    }

    /// Dependencies that are not healthy, in id order
    pub fn unhealthy_dependencies(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|(_, metrics)| !metrics.is_healthy())
            .map(|(dependency, _)| dependency.as_str())
            .collect()
    }

    /// 1.0 with no breakers or all healthy, 0.0 with every breaker open
    pub fn health_score(&self) -> f64 {
        if self.dependencies.is_empty() {
            return 1.0;
        }
        let total: f64 = self.dependencies.values().map(|m| m.health_weight()).sum();
        total / self.dependencies.len() as f64
    }

    pub fn total_rejections(&self) -> u64 {
        self.dependencies.values().map(|m| m.rejected_count).sum()
    }

    /// Failures by kind summed over every dependency
    pub fn failures_by_kind(&self) -> HashMap<ErrorKind, u64> {
        let mut totals = HashMap::new();
        for metrics in self.dependencies.values() {
            for (kind, count) in &metrics.failures_by_kind {
                *totals.entry(*kind).or_insert(0) += count;
            }
        }
        totals
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
