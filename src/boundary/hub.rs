//! # Failure Hub
//!
//! Process-wide delivery of failures that escape asynchronous work. Boundaries
//! subscribe on mount; a failure is offered to subscribers in registration order
//! and the first one that accepts it stops propagation. Failures nobody accepts
//! are classified, logged and reported as unclaimed.
//!
//! Registration order means an outer boundary mounted before an inner one gets
//! first refusal, so async failures are attributed to the outermost healthy
//! boundary rather than the one whose subtree spawned the work.

use crate::classification::{
    ErrorClassifier, ErrorContext, Failure, StandardErrorClassifier,
};
use crate::constants::{channels, context_keys};
use crate::logging::log_error;
use crate::telemetry::TelemetrySink;
use futures::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::task::JoinHandle;
use tracing::debug;

/// Receives an unhandled failure; returns `true` when it takes ownership
pub type FailureHandler = Arc<dyn Fn(&Failure) -> bool + Send + Sync>;

static GLOBAL_HUB: OnceLock<Arc<FailureHub>> = OnceLock::new();

/// Registry of failure listeners
pub struct FailureHub {
    handlers: RwLock<Vec<(u64, FailureHandler)>>,
    next_id: AtomicU64,
    classifier: Arc<dyn ErrorClassifier>,
    telemetry: RwLock<Option<Arc<TelemetrySink>>>,
    report_unclaimed: bool,
}

impl std::fmt::Debug for FailureHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureHub")
            .field("subscribers", &self.subscriber_count())
            .field("classifier", &self.classifier.classifier_name())
            .field("report_unclaimed", &self.report_unclaimed)
            .finish()
    }
}

impl FailureHub {
    pub fn new(classifier: Arc<dyn ErrorClassifier>, report_unclaimed: bool) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            classifier,
            telemetry: RwLock::new(None),
            report_unclaimed,
        }
    }

    /// The process-wide hub
    pub fn global() -> &'static Arc<FailureHub> {
        GLOBAL_HUB.get_or_init(|| {
            Arc::new(FailureHub::new(
                Arc::new(StandardErrorClassifier::new()),
                true,
            ))
        })
    }

    /// Sink that receives unclaimed failures
    pub fn set_telemetry(&self, telemetry: Arc<TelemetrySink>) {
        *self.telemetry.write() = Some(telemetry);
    }

    /// Register a handler; it stays registered until the subscription drops
    pub fn subscribe(self: &Arc<Self>, handler: FailureHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, handler));
        debug!(subscription_id = id, "Failure handler subscribed");
        Subscription {
            hub: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.handlers.write().retain(|(handler_id, _)| *handler_id != id);
        debug!(subscription_id = id, "Failure handler unsubscribed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Offer a failure to subscribers; returns whether one accepted it
    pub fn report_unhandled(&self, failure: Failure) -> bool {
        // handlers run without the lock held so they may (un)subscribe
        let handlers: Vec<FailureHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        if handlers.iter().any(|handler| handler(&failure)) {
            return true;
        }

        let record = self.classifier.classify(
            &failure,
            ErrorContext::new().with(context_keys::CHANNEL, channels::UNCLAIMED),
        );
        log_error(
            "failure_hub",
            channels::UNCLAIMED,
            record.message(),
            Some(&record.kind().to_string()),
        );
        if self.report_unclaimed {
            if let Some(telemetry) = self.telemetry.read().as_ref() {
                telemetry.report(record);
            }
        }
        false
    }

    /// Run `future` on the runtime; an `Err` or panic becomes an unhandled failure
    pub fn spawn_supervised<F, T, E>(self: &Arc<Self>, future: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(value)) => Some(value),
                Ok(Err(error)) => {
                    hub.report_unhandled(Failure::from(error));
                    None
                }
                Err(payload) => {
                    hub.report_unhandled(Failure::from_panic(payload));
                    None
                }
            }
        })
    }
}

/// Keeps a handler registered; unregisters on drop
#[derive(Debug)]
pub struct Subscription {
    hub: Weak<FailureHub>,
    id: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
