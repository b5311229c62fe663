//! # Classification Module
//!
//! Turns raw failures (error values and caught panics) into immutable
//! [`ErrorRecord`]s carrying a kind, severity and recoverability verdict. Every
//! other component consults these records instead of inspecting errors itself.

pub mod classifier;
pub mod failure;
pub mod record;

pub use classifier::{ErrorClassifier, ErrorContext, StandardErrorClassifier};
pub use failure::{CausedError, ErrorCause, Failure, PanicFailure};
pub use record::{ErrorKind, ErrorRecord, ErrorSeverity};
