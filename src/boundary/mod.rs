//! # Boundary Module
//!
//! Failure containment for supervised subtrees.
//!
//! - [`ErrorBoundary`] catches synchronous mount failures (errors and panics)
//!   and swaps in a fallback view with a retry handle.
//! - [`FailureHub`] delivers failures from background work to attached
//!   boundaries; unclaimed failures are logged and reported.

pub mod controller;
pub mod hub;

pub use controller::{
    BoundaryState, BoundaryStatus, ErrorBoundary, Rendered, RetryAction, Supervised,
};
pub use hub::{FailureHandler, FailureHub, Subscription};
