//! # Retry Controller
//!
//! Re-invokes a failing async operation with exponential backoff, but only
//! while the classifier considers the failure recoverable.
//!
//! With `max_attempts = N` the operation runs at most `N + 1` times: one initial
//! invocation followed by up to `N` retries. The wait before retry `k` (1-based)
//! is `base_delay * 2^(k-1)`. Backoff is uncapped unless `max_delay` is set.
//!
//! ```rust,no_run
//! use resilience_core::resilience::{with_retry, RetryConfig};
//! use resilience_core::classification::CausedError;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let mut load_feed = with_retry(
//!     || async { Err::<String, _>(CausedError::network("connection reset")) },
//!     RetryConfig::new(3, Duration::from_millis(100)),
//! )
//! .named("load_feed");
//!
//! let result = load_feed.call().await;
//! assert!(result.is_err());
//! # }
//! ```

use crate::classification::{ErrorClassifier, ErrorContext, ErrorRecord, StandardErrorClassifier};
use crate::constants::{context_keys, defaults};
use crate::logging::log_retry_attempt;
use crate::telemetry::TelemetrySink;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Backoff policy for a retryable call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries allowed after the initial invocation
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Optional ceiling on a single backoff
    pub max_delay: Option<Duration>,
    /// Report every failed attempt, not just the terminal one
    pub report_each_attempt: bool,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay before the given retry (1-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        match self.max_delay {
            Some(max_delay) => delay.min(max_delay),
            None => delay,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(defaults::RETRY_BASE_DELAY_MS),
            max_delay: None,
            report_each_attempt: false,
        }
    }
}

/// Progress of one retryable call. `attempt` counts retries already scheduled
/// and never exceeds `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Invocations made so far, counting the one in progress
    pub fn invocations(&self) -> u32 {
        self.attempt + 1
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Move to the next retry; returns `false` once the ceiling is reached
    pub fn advance(&mut self) -> bool {
        if !self.can_retry() {
            return false;
        }
        self.attempt += 1;
        true
    }
}

/// Terminal outcome of a retried call
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("{source}")]
    NonRecoverable { record: ErrorRecord, source: E },

    #[error("{source} (after {attempts} attempts)")]
    Exhausted {
        attempts: u32,
        record: ErrorRecord,
        source: E,
    },

    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// Classification of the last failure, absent when cancelled
    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            RetryError::NonRecoverable { record, .. } | RetryError::Exhausted { record, .. } => {
                Some(record)
            }
            RetryError::Cancelled { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NonRecoverable { record, .. } => record
                .context_value(context_keys::ATTEMPT)
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
                .unwrap_or(1),
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts } => {
                *attempts
            }
        }
    }

    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::NonRecoverable { source, .. } | RetryError::Exhausted { source, .. } => {
                Some(source)
            }
            RetryError::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Clonable handle that aborts a running retry loop
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Abort the pending backoff or in-flight attempt; no further attempts run
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_cancelled(receiver: &mut watch::Receiver<bool>) {
    if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
        // sender gone, cancellation can no longer happen
        std::future::pending::<()>().await;
    }
}

/// Wraps operations with classified, bounded retries
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
    classifier: Arc<dyn ErrorClassifier>,
    telemetry: Option<Arc<TelemetrySink>>,
    operation_name: String,
}

impl RetryController {
    pub fn new(config: RetryConfig, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self {
            config,
            classifier,
            telemetry: None,
            operation_name: "anonymous".to_string(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Operation id recorded in every record's context
    pub fn named(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = operation_name.into();
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_with_cancellation(operation, &CancellationHandle::new())
            .await
    }

    pub async fn execute_with_cancellation<F, Fut, T, E>(
        &self,
        mut operation: F,
        cancellation: &CancellationHandle,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut state = RetryState::new(self.config.max_attempts);
        let mut cancel_rx = cancellation.subscribe();

        loop {
            if cancellation.is_cancelled() {
                return Err(self.cancelled(state.attempt()));
            }

            let outcome = tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel_rx) => None,
                result = operation() => Some(result),
            };

            let error = match outcome {
                None => return Err(self.cancelled(state.invocations())),
                Some(Ok(value)) => {
                    if state.attempt() > 0 {
                        debug!(
                            operation = %self.operation_name,
                            attempts = state.invocations(),
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Some(Err(error)) => error,
            };

            let exhausted = !state.can_retry();
            let mut context = ErrorContext::new()
                .operation(self.operation_name.as_str())
                .attempt(state.invocations());
            if exhausted {
                context = context.with(context_keys::TOTAL_ATTEMPTS, state.invocations());
            }
            let record = self.classifier.classify_error(&error, context);

            if !record.is_recoverable() {
                warn!(
                    operation = %self.operation_name,
                    error_kind = %record.kind(),
                    attempt = state.invocations(),
                    "Non-recoverable failure, not retrying"
                );
                self.report(&record);
                return Err(RetryError::NonRecoverable {
                    record,
                    source: error,
                });
            }

            if exhausted {
                warn!(
                    operation = %self.operation_name,
                    error_kind = %record.kind(),
                    attempts = state.invocations(),
                    "Retries exhausted"
                );
                self.report(&record);
                return Err(RetryError::Exhausted {
                    attempts: state.invocations(),
                    record,
                    source: error,
                });
            }

            if self.config.report_each_attempt {
                self.report(&record);
            }

            let delay = self.config.delay_for_retry(state.attempt() + 1);
            log_retry_attempt(
                &self.operation_name,
                state.attempt() + 1,
                self.config.max_attempts,
                delay,
                record.kind(),
            );

            tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel_rx) => {
                    return Err(self.cancelled(state.invocations()));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            state.advance();
        }
    }

    fn cancelled<E>(&self, attempts: u32) -> RetryError<E> {
        debug!(
            operation = %self.operation_name,
            attempts = attempts,
            "Retry cancelled"
        );
        RetryError::Cancelled { attempts }
    }

    fn report(&self, record: &ErrorRecord) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.report(record.clone());
        }
    }
}

/// An operation bound to a retry policy; each `call` is an independent
/// retryable call with fresh [`RetryState`]
pub struct RetryingOperation<F> {
    operation: F,
    controller: RetryController,
}

impl<F> std::fmt::Debug for RetryingOperation<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingOperation")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl<F> RetryingOperation<F> {
    pub fn named(mut self, operation_name: impl Into<String>) -> Self {
        self.controller = self.controller.named(operation_name);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetrySink>) -> Self {
        self.controller = self.controller.with_telemetry(telemetry);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.controller.classifier = classifier;
        self
    }

    pub async fn call<Fut, T, E>(&mut self) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.controller.execute(&mut self.operation).await
    }

    pub async fn call_with_cancellation<Fut, T, E>(
        &mut self,
        cancellation: &CancellationHandle,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.controller
            .execute_with_cancellation(&mut self.operation, cancellation)
            .await
    }
}

/// Bind `operation` to `config` using the standard classifier
pub fn with_retry<F>(operation: F, config: RetryConfig) -> RetryingOperation<F> {
    RetryingOperation {
        operation,
        controller: RetryController::new(config, Arc::new(StandardErrorClassifier::new())),
    }
}
