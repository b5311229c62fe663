//! # Raw Failures
//!
//! Inputs to the classifier. Upstream code that knows why it failed can say so
//! with [`CausedError`]; everything else arrives as an opaque error or a caught
//! panic and is classified from its type and message.

use crate::classification::ErrorKind;
use std::any::Any;
use std::error::Error;
use thiserror::Error;

/// Explicit failure cause supplied by the failing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCause {
    Network,
    Timeout,
    PermissionDenied,
    Validation,
    Runtime,
}

impl ErrorCause {
    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorCause::Network => ErrorKind::Network,
            ErrorCause::Timeout => ErrorKind::Timeout,
            ErrorCause::PermissionDenied => ErrorKind::Permission,
            ErrorCause::Validation => ErrorKind::Validation,
            ErrorCause::Runtime => ErrorKind::Runtime,
        }
    }
}

/// Error carrying a structured cause
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CausedError {
    cause: ErrorCause,
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl CausedError {
    pub fn new(cause: ErrorCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
            source: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCause::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCause::Timeout, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCause::PermissionDenied, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCause::Validation, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorCause::Runtime, message)
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn cause(&self) -> ErrorCause {
        self.cause
    }
}

/// A caught panic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicFailure {
    message: String,
}

impl PanicFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extract the message from a `catch_unwind` payload
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Anything that can escape an operation or a supervised subtree
#[derive(Debug)]
pub enum Failure {
    Error(Box<dyn Error + Send + Sync + 'static>),
    Panic(PanicFailure),
}

impl Failure {
    pub fn from_boxed(error: Box<dyn Error + Send + Sync + 'static>) -> Self {
        Failure::Error(error)
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Failure::Panic(PanicFailure::from_payload(payload.as_ref()))
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Failure::Panic(_))
    }
}

impl<E> From<E> for Failure
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Failure::Error(Box::new(error))
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Error(error) => write!(f, "{error}"),
            Failure::Panic(panic) => write!(f, "panic: {}", panic.message()),
        }
    }
}
