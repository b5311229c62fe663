//! # Error Boundary
//!
//! Supervises a subtree of work. While the subtree is healthy its view is
//! rendered; once a failure is caught the view is replaced by a caller-supplied
//! fallback until the user asks to retry.
//!
//! ```text
//!            catch (render Err / panic / hub)
//!   Healthy ─────────────────────────────────▶ Failed
//!      ▲                                          │
//!      └────────────── user retry ◀───────────────┘
//! ```
//!
//! Only the subtree's `mount` is guarded. A failure inside the fallback is not
//! caught by the same boundary and propagates to the enclosing one.

use crate::boundary::{FailureHub, Subscription};
use crate::classification::{
    ErrorClassifier, ErrorContext, ErrorRecord, Failure, StandardErrorClassifier,
};
use crate::constants::{channels, context_keys};
use crate::logging::log_boundary_event;
use crate::telemetry::TelemetrySink;
use parking_lot::{Mutex, RwLock};
use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A supervised subtree
pub trait Supervised {
    type View;

    /// Produce the subtree's view; an `Err` or panic puts the boundary in `Failed`
    fn mount(&mut self) -> Result<Self::View, Box<dyn Error + Send + Sync>>;

    /// Release whatever `mount` acquired
    fn unmount(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStatus {
    Healthy,
    Failed,
}

/// Failure state of one boundary
#[derive(Debug, Clone, Default)]
pub struct BoundaryState {
    has_error: bool,
    current_error: Option<ErrorRecord>,
}

impl BoundaryState {
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn current_error(&self) -> Option<&ErrorRecord> {
        self.current_error.as_ref()
    }

    pub fn status(&self) -> BoundaryStatus {
        if self.has_error {
            BoundaryStatus::Failed
        } else {
            BoundaryStatus::Healthy
        }
    }

    /// Move to `Failed`; refused when already failed
    fn catch(&mut self, record: ErrorRecord) -> bool {
        if self.has_error {
            return false;
        }
        self.has_error = true;
        self.current_error = Some(record);
        true
    }

    fn clear(&mut self) {
        self.has_error = false;
        self.current_error = None;
    }
}

/// Handle given to fallbacks; invoking it asks the boundary to retry on its
/// next render
#[derive(Debug, Clone, Default)]
pub struct RetryAction {
    requested: Arc<AtomicBool>,
}

impl RetryAction {
    pub fn invoke(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}

/// Output of [`ErrorBoundary::render`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered<V> {
    Content(V),
    Fallback(V),
}

impl<V> Rendered<V> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Rendered::Fallback(_))
    }

    pub fn into_view(self) -> V {
        match self {
            Rendered::Content(view) | Rendered::Fallback(view) => view,
        }
    }
}

type FallbackFn<V> = Box<dyn Fn(&ErrorRecord, RetryAction) -> V + Send + Sync>;

/// Classifier and sink shared between the boundary and its hub handler
#[derive(Debug, Clone)]
struct Reporting {
    classifier: Arc<dyn ErrorClassifier>,
    telemetry: Option<Arc<TelemetrySink>>,
}

impl Reporting {
    fn classify_and_report(
        &self,
        boundary: &str,
        failure: &Failure,
        channel: &str,
    ) -> ErrorRecord {
        let record = self.classifier.classify(
            failure,
            ErrorContext::new()
                .component(boundary)
                .with(context_keys::BOUNDARY, boundary)
                .with(context_keys::CHANNEL, channel),
        );
        if let Some(telemetry) = &self.telemetry {
            telemetry.report(record.clone());
        }
        record
    }
}

/// Supervises a [`Supervised`] subtree
pub struct ErrorBoundary<S: Supervised> {
    name: String,
    subtree: S,
    fallback: FallbackFn<S::View>,
    state: Arc<Mutex<BoundaryState>>,
    retry_action: RetryAction,
    reporting: Arc<RwLock<Reporting>>,
    subscription: Option<Subscription>,
    mounted: bool,
}

impl<S: Supervised> std::fmt::Debug for ErrorBoundary<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorBoundary")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .field("mounted", &self.mounted)
            .field("subscribed", &self.subscription.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: Supervised> ErrorBoundary<S> {
    pub fn new<F>(name: impl Into<String>, subtree: S, fallback: F) -> Self
    where
        F: Fn(&ErrorRecord, RetryAction) -> S::View + Send + Sync + 'static,
    {
        let name = name.into();
        log_boundary_event(&name, "created", None);
        Self {
            name,
            subtree,
            fallback: Box::new(fallback),
            state: Arc::new(Mutex::new(BoundaryState::default())),
            retry_action: RetryAction::default(),
            reporting: Arc::new(RwLock::new(Reporting {
                classifier: Arc::new(StandardErrorClassifier::new()),
                telemetry: None,
            })),
            subscription: None,
            mounted: false,
        }
    }

    /// Applies to hub failures too, whether called before or after `attach`
    pub fn with_classifier(self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.reporting.write().classifier = classifier;
        self
    }

    /// Applies to hub failures too, whether called before or after `attach`
    pub fn with_telemetry(self, telemetry: Arc<TelemetrySink>) -> Self {
        self.reporting.write().telemetry = Some(telemetry);
        self
    }

    /// Subscribe to unhandled async failures delivered through `hub`
    pub fn attach(mut self, hub: &Arc<FailureHub>) -> Self {
        let name = self.name.clone();
        let state = Arc::clone(&self.state);
        let reporting = Arc::clone(&self.reporting);

        let handler = move |failure: &Failure| -> bool {
            let mut state = state.lock();
            if state.has_error() {
                return false;
            }
            let record = reporting
                .read()
                .classify_and_report(&name, failure, channels::ASYNC);
            log_boundary_event(&name, "caught", Some(&format!("async {}", record.kind())));
            state.catch(record)
        };

        self.subscription = Some(hub.subscribe(Arc::new(handler)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> BoundaryStatus {
        self.state.lock().status()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> BoundaryState {
        self.state.lock().clone()
    }

    pub fn retry_action(&self) -> RetryAction {
        self.retry_action.clone()
    }

    pub fn subtree(&self) -> &S {
        &self.subtree
    }

    /// Render the subtree, or the fallback while failed.
    ///
    /// A pending [`RetryAction`] is applied first.
    pub fn render(&mut self) -> Rendered<S::View> {
        if self.retry_action.take() {
            self.reset();
        }

        let current_error = self.state.lock().current_error.clone();
        if let Some(record) = current_error {
            return Rendered::Fallback((self.fallback)(&record, self.retry_action.clone()));
        }

        let subtree = &mut self.subtree;
        let failure = match catch_unwind(AssertUnwindSafe(|| subtree.mount())) {
            Ok(Ok(view)) => {
                self.mounted = true;
                return Rendered::Content(view);
            }
            Ok(Err(error)) => Failure::from_boxed(error),
            Err(payload) => Failure::from_panic(payload),
        };

        let record = self
            .reporting
            .read()
            .classify_and_report(&self.name, &failure, channels::RENDER);
        log_boundary_event(&self.name, "caught", Some(&format!("render {}", record.kind())));

        let caught = {
            let mut state = self.state.lock();
            state.catch(record.clone());
            state.current_error.clone().unwrap_or(record)
        };
        Rendered::Fallback((self.fallback)(&caught, self.retry_action.clone()))
    }

    /// Clear the failure and remount. Does not re-run whatever failed.
    pub fn retry(&mut self) -> Rendered<S::View> {
        self.retry_action.take();
        self.reset();
        self.render()
    }

    fn reset(&mut self) {
        let mut state = self.state.lock();
        if !state.has_error() {
            return;
        }
        state.clear();
        drop(state);

        if self.mounted {
            self.subtree.unmount();
            self.mounted = false;
        }
        log_boundary_event(&self.name, "retry", None);
    }
}

impl<S: Supervised> Drop for ErrorBoundary<S> {
    fn drop(&mut self) {
        if self.mounted {
            self.subtree.unmount();
        }
        // dropping the subscription unregisters from the hub
        self.subscription.take();
        log_boundary_event(&self.name, "unmounted", None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{CausedError, ErrorKind};

    struct Widget {
        failures_left: u32,
        mounts: u32,
        unmounts: u32,
    }

    impl Supervised for Widget {
        type View = String;

        fn mount(&mut self) -> Result<String, Box<dyn Error + Send + Sync>> {
            self.mounts += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(Box::new(CausedError::validation("profile payload malformed")));
            }
            Ok("profile".to_string())
        }

        fn unmount(&mut self) {
            self.unmounts += 1;
        }
    }

    fn boundary(failures: u32) -> ErrorBoundary<Widget> {
        ErrorBoundary::new(
            "ProfileScreen",
            Widget {
                failures_left: failures,
                mounts: 0,
                unmounts: 0,
            },
            |record: &ErrorRecord, _retry: RetryAction| format!("fallback: {}", record.kind()),
        )
    }

    #[test]
    fn test_healthy_render_shows_content() {
        let mut boundary = boundary(0);
        assert_eq!(boundary.render(), Rendered::Content("profile".to_string()));
        assert_eq!(boundary.status(), BoundaryStatus::Healthy);
    }

    #[test]
    fn test_render_error_switches_to_fallback() {
        let mut boundary = boundary(1);
        let rendered = boundary.render();
        assert_eq!(rendered, Rendered::Fallback("fallback: Validation".to_string()));

        let state = boundary.state();
        assert!(state.has_error());
        assert_eq!(state.current_error().map(|r| r.kind()), Some(ErrorKind::Validation));
        assert_eq!(
            state.current_error().and_then(|r| r.context_value("channel")),
            Some(&"render".into())
        );

        // stays failed without remounting
        assert!(boundary.render().is_fallback());
        assert_eq!(boundary.subtree().mounts, 1);
    }

    #[test]
    fn test_retry_action_remounts_on_next_render() {
        let mut boundary = boundary(1);
        assert!(boundary.render().is_fallback());

        boundary.retry_action().invoke();
        assert_eq!(boundary.render(), Rendered::Content("profile".to_string()));
        assert_eq!(boundary.status(), BoundaryStatus::Healthy);
        assert_eq!(boundary.subtree().mounts, 2);
    }

    #[test]
    fn test_panic_in_mount_is_runtime() {
        struct Exploding;
        impl Supervised for Exploding {
            type View = &'static str;
            fn mount(&mut self) -> Result<&'static str, Box<dyn Error + Send + Sync>> {
                let items: Vec<&str> = Vec::new();
                Ok(items[3])
            }
        }

        let mut boundary = ErrorBoundary::new("Feed", Exploding, |_: &ErrorRecord, _: RetryAction| "oops");
        assert_eq!(boundary.render(), Rendered::Fallback("oops"));
        assert_eq!(
            boundary.state().current_error().map(|r| r.kind()),
            Some(ErrorKind::Runtime)
        );
    }
}
