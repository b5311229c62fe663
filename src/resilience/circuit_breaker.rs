//! # Circuit Breaker Implementation
//!
//! Stops calling a dependency that keeps failing. Three states:
//! Closed (normal operation), Open (failing fast), and Half-Open (one probe call
//! allowed through to test recovery).
//!
//! Every transition is a single compare-and-swap on the atomic status, so under
//! concurrent callers exactly one of them performs (and logs) a given transition.

use crate::classification::{ErrorClassifier, ErrorContext, ErrorKind, StandardErrorClassifier};
use crate::constants::context_keys;
use crate::logging::log_circuit_transition;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lock-free atomic counters for circuit breaker metrics.
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    total_duration_nanos: AtomicU64,
    failures_by_kind: [AtomicU64; ErrorKind::ALL.len()],
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
            failures_by_kind: Default::default(),
        }
    }

    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration, kind: ErrorKind) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        if let Some(slot) = ErrorKind::ALL
            .iter()
            .position(|k| *k == kind)
            .and_then(|idx| self.failures_by_kind.get(idx))
        {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, state: CircuitState, consecutive_failures: u32) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let total_duration_nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        CircuitBreakerMetrics {
            current_state: state,
            total_calls,
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            consecutive_failures,
            failures_by_kind: ErrorKind::ALL
                .iter()
                .zip(self.failures_by_kind.iter())
                .map(|(kind, count)| (*kind, count.load(Ordering::Relaxed)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            mean_latency: Duration::from_nanos(
                total_duration_nanos.checked_div(total_calls).unwrap_or(0),
            ),
        }
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    #[default]
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single probe call is allowed through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Returned instead of invoking the operation while the circuit rejects calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Circuit breaker is open for {dependency}")]
pub struct CircuitOpenError {
    pub dependency: String,
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("{0}")]
    CircuitOpen(#[source] CircuitOpenError),

    /// Operation ran and failed; the failure was recorded
    #[error("{0}")]
    OperationFailed(#[source] E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen(_))
    }

    /// The operation's own error, if it ran
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::OperationFailed(error) => Some(error),
            CircuitBreakerError::CircuitOpen(_) => None,
        }
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Holds the half-open probe slot; releases it if the probe never completes
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(dependency = %self.breaker.name, "Probe abandoned, releasing slot");
            self.breaker.probe_in_flight.store(false, Ordering::Release);
        }
    }
}

/// Core circuit breaker implementation with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Dependency id for logging and metrics
    name: String,

    state: AtomicU8,

    config: CircuitBreakerConfig,

    /// Consecutive failures; only grows in Closed and HalfOpen
    failure_count: AtomicU32,

    /// Nanos since `created_at` plus one at the last opening failure (0 = none).
    last_failure_nanos: AtomicU64,

    probe_in_flight: AtomicBool,

    /// Disabled breakers admit every call and never open
    enabled: bool,

    created_at: Instant,

    classifier: Arc<dyn ErrorClassifier>,

    metrics: AtomicCircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self::with_classifier(name, config, Arc::new(StandardErrorClassifier::new()))
    }

    pub fn with_classifier(
        name: String,
        config: CircuitBreakerConfig,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        info!(
            dependency = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            failure_count: AtomicU32::new(0),
            last_failure_nanos: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            enabled: true,
            created_at: Instant::now(),
            classifier,
            metrics: AtomicCircuitBreakerMetrics::new(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        if !enabled {
            info!(dependency = %self.name, "Circuit breaker disabled, calls pass through");
        }
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// While the circuit is open the operation is not invoked and
    /// [`CircuitBreakerError::CircuitOpen`] is returned. Dropping the returned
    /// future during a half-open probe releases the probe slot.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let admission = match self.try_acquire() {
            Some(admission) => admission,
            None => {
                self.metrics.record_rejection();
                debug!(dependency = %self.name, "Call rejected, circuit open");
                return Err(CircuitBreakerError::CircuitOpen(CircuitOpenError {
                    dependency: self.name.clone(),
                }));
            }
        };

        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(duration, admission),
            Err(error) => {
                let kind = self
                    .classifier
                    .classify_error(
                        error,
                        ErrorContext::new().with(context_keys::DEPENDENCY, self.name.as_str()),
                    )
                    .kind();
                self.record_failure(duration, admission, kind);
            }
        }
        guard.disarm();

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may proceed; `None` means reject
    fn try_acquire(&self) -> Option<Admission> {
        if !self.enabled {
            return Some(Admission::Normal);
        }

        match self.state() {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                if !self.reset_timeout_elapsed() {
                    return None;
                }

                // claim the probe slot before exposing HalfOpen
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return None;
                }

                if self.transition(CircuitState::Open, CircuitState::HalfOpen) {
                    Some(Admission::Probe)
                } else {
                    self.probe_in_flight.store(false, Ordering::Release);
                    match self.state() {
                        CircuitState::Closed => Some(Admission::Normal),
                        _ => None,
                    }
                }
            }
            CircuitState::HalfOpen => {
                // slot only frees up when a previous probe was abandoned
                self.probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .ok()
                    .map(|_| Admission::Probe)
            }
        }
    }

    fn reset_timeout_elapsed(&self) -> bool {
        let last_failure = self.last_failure_nanos.load(Ordering::Acquire);
        if last_failure == 0 {
            warn!(dependency = %self.name, "Circuit open but no failure time recorded");
            return true;
        }

        let elapsed = self.now_nanos().saturating_sub(last_failure);
        u128::from(elapsed) > self.config.reset_timeout.as_nanos()
    }

    #[inline]
    fn now_nanos(&self) -> u64 {
        (self.created_at.elapsed().as_nanos() as u64).saturating_add(1)
    }

    fn record_success(&self, duration: Duration, admission: Admission) {
        self.metrics.record_success(duration);

        debug!(
            dependency = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation succeeded"
        );

        match admission {
            Admission::Probe => {
                // zero before Closed is visible so no failure counts on a stale total
                self.failure_count.store(0, Ordering::Release);
                if self.transition(CircuitState::HalfOpen, CircuitState::Closed) {
                    self.last_failure_nanos.store(0, Ordering::Release);
                }
                self.probe_in_flight.store(false, Ordering::Release);
            }
            Admission::Normal => {
                if self.state() == CircuitState::Closed {
                    self.failure_count.store(0, Ordering::Release);
                }
            }
        }
    }

    fn record_failure(&self, duration: Duration, admission: Admission, kind: ErrorKind) {
        self.metrics.record_failure(duration, kind);

        debug!(
            dependency = %self.name,
            duration_ms = duration.as_millis() as u64,
            error_kind = %kind,
            "Operation failed"
        );

        match admission {
            Admission::Probe => {
                self.failure_count.fetch_add(1, Ordering::AcqRel);
                self.last_failure_nanos
                    .store(self.now_nanos(), Ordering::Release);
                self.transition(CircuitState::HalfOpen, CircuitState::Open);
                self.probe_in_flight.store(false, Ordering::Release);
            }
            Admission::Normal => {
                if !self.enabled || self.state() != CircuitState::Closed {
                    return;
                }
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.last_failure_nanos
                        .store(self.now_nanos(), Ordering::Release);
                    self.transition(CircuitState::Closed, CircuitState::Open);
                }
            }
        }
    }

    /// Single CAS step; only the winning caller logs the transition
    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        let won = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if won {
            log_circuit_transition(&self.name, from, to, self.failure_count());
        }
        won
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(dependency = %self.name, "Circuit breaker forced open");
        self.last_failure_nanos
            .store(self.now_nanos(), Ordering::Release);
        let previous = CircuitState::from(self.state.swap(CircuitState::Open as u8, Ordering::AcqRel));
        if previous != CircuitState::Open {
            log_circuit_transition(&self.name, previous, CircuitState::Open, self.failure_count());
        }
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(dependency = %self.name, "Circuit breaker forced closed");
        self.failure_count.store(0, Ordering::Release);
        self.last_failure_nanos.store(0, Ordering::Release);
        let previous =
            CircuitState::from(self.state.swap(CircuitState::Closed as u8, Ordering::AcqRel));
        if previous != CircuitState::Closed {
            log_circuit_transition(&self.name, previous, CircuitState::Closed, 0);
        }
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics.snapshot(self.state(), self.failure_count())
    }

    /// Get dependency id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closed with a low failure rate; see [`CircuitBreakerMetrics::is_healthy`]
    pub fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }
}
