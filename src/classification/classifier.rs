//! # Failure Classification
//!
//! Maps raw failures onto the [`ErrorKind`] taxonomy.
//!
//! ## Overview
//!
//! Classification walks the error's `source()` chain looking for a structured
//! cause first: an explicit [`CausedError`], an open circuit, or a well-known
//! library error (`std::io`, `tokio` deadlines, `serde_json`, `reqwest`). Only when
//! nothing structured is found does it fall back to matching the rendered
//! messages, and those rules live here and nowhere else.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Failure         │────▶│ structured      │────▶│ ErrorRecord     │
//! │ + ErrorContext  │     │ → message rules │     │ kind/severity   │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use resilience_core::classification::{
//!     ErrorClassifier, ErrorContext, ErrorKind, StandardErrorClassifier,
//! };
//!
//! let classifier = StandardErrorClassifier::new();
//! let error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
//! let record = classifier.classify_error(&error, ErrorContext::new().operation("load_feed"));
//!
//! assert_eq!(record.kind(), ErrorKind::Network);
//! assert!(record.is_recoverable());
//! ```

use crate::classification::{CausedError, ErrorKind, ErrorRecord, Failure, PanicFailure};
use crate::constants::context_keys;
use crate::resilience::CircuitOpenError;
use std::collections::HashMap;
use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Caller-side context merged into the record
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub component: Option<String>,
    pub operation: Option<String>,
    pub attempt: Option<u32>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn into_map(self) -> HashMap<String, serde_json::Value> {
        let mut map = self.metadata;
        if let Some(component) = self.component {
            map.insert(context_keys::COMPONENT.to_string(), component.into());
        }
        if let Some(operation) = self.operation {
            map.insert(context_keys::OPERATION.to_string(), operation.into());
        }
        if let Some(attempt) = self.attempt {
            map.insert(context_keys::ATTEMPT.to_string(), attempt.into());
        }
        map
    }
}

/// How a kind was decided, recorded under `classified_by`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchSource {
    Structured,
    Message,
    Panic,
    Default,
}

impl MatchSource {
    fn as_str(self) -> &'static str {
        match self {
            MatchSource::Structured => "structured",
            MatchSource::Message => "message",
            MatchSource::Panic => "panic",
            MatchSource::Default => "default",
        }
    }
}

/// Trait for classification strategies
pub trait ErrorClassifier: Send + Sync + std::fmt::Debug {
    /// Classify an error value. Must not panic.
    fn classify_error(&self, error: &(dyn Error + 'static), context: ErrorContext) -> ErrorRecord;

    /// Classify a caught panic. Must not panic.
    fn classify_panic(&self, panic: &PanicFailure, context: ErrorContext) -> ErrorRecord;

    /// Get the classifier name for identification
    fn classifier_name(&self) -> &'static str;

    fn classify(&self, failure: &Failure, context: ErrorContext) -> ErrorRecord {
        match failure {
            Failure::Error(error) => self.classify_error(error.as_ref(), context),
            Failure::Panic(panic) => self.classify_panic(panic, context),
        }
    }
}

const NETWORK_PATTERNS: &[&str] = &[
    "network",
    "connection",
    "econnrefused",
    "econnreset",
    "socket",
    "dns",
    "unreachable",
    "fetch failed",
    "transport",
];
const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out", "deadline", "etimedout"];
const PERMISSION_PATTERNS: &[&str] = &[
    "permission",
    "access denied",
    "denied",
    "unauthorized",
    "forbidden",
    "not authorized",
    "eacces",
];
const VALIDATION_PATTERNS: &[&str] = &["validation", "invalid", "schema", "malformed", "required field"];
const RUNTIME_PATTERNS: &[&str] = &[
    "panicked",
    "null pointer",
    "of null",
    "undefined",
    "is not defined",
    "is not a function",
    "referenceerror",
    "typeerror",
    "index out of bounds",
];

/// Standard classifier: structured causes, then message rules, then `Unknown`
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier;

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    fn classify_error_inner(
        &self,
        error: &(dyn Error + 'static),
        context: ErrorContext,
    ) -> ErrorRecord {
        let message = error.to_string();
        let (kind, source) = match Self::structured_kind(error) {
            Some(kind) => (kind, MatchSource::Structured),
            None => match Self::message_kind(&Self::chain_text(error)) {
                Some(kind) => (kind, MatchSource::Message),
                None => (ErrorKind::Unknown, MatchSource::Default),
            },
        };

        ErrorRecord::new(kind, message)
            .with_stack_trace(Self::source_chain(error))
            .with_context_map(context.into_map())
            .with_context(context_keys::CLASSIFIED_BY, source.as_str())
    }

    /// Walk the source chain and return the first structured kind found
    fn structured_kind(error: &(dyn Error + 'static)) -> Option<ErrorKind> {
        let mut current: Option<&(dyn Error + 'static)> = Some(error);
        while let Some(err) = current {
            if let Some(kind) = Self::structured_kind_of(err) {
                return Some(kind);
            }
            current = err.source();
        }
        None
    }

    fn structured_kind_of(err: &(dyn Error + 'static)) -> Option<ErrorKind> {
        if let Some(caused) = err.downcast_ref::<CausedError>() {
            return Some(caused.cause().kind());
        }
        if err.downcast_ref::<CircuitOpenError>().is_some() {
            return Some(ErrorKind::Network);
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return Self::io_kind(io.kind());
        }
        if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return Some(ErrorKind::Timeout);
        }
        if let Some(json) = err.downcast_ref::<serde_json::Error>() {
            return match json.classify() {
                serde_json::error::Category::Io => None,
                _ => Some(ErrorKind::Validation),
            };
        }
        if err.downcast_ref::<std::num::ParseIntError>().is_some()
            || err.downcast_ref::<std::num::ParseFloatError>().is_some()
        {
            return Some(ErrorKind::Validation);
        }
        if let Some(http) = err.downcast_ref::<reqwest::Error>() {
            return Self::http_kind(http);
        }
        None
    }

    fn io_kind(kind: std::io::ErrorKind) -> Option<ErrorKind> {
        use std::io::ErrorKind as Io;
        match kind {
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::AddrInUse
            | Io::AddrNotAvailable
            | Io::BrokenPipe => Some(ErrorKind::Network),
            Io::TimedOut | Io::WouldBlock => Some(ErrorKind::Timeout),
            Io::PermissionDenied => Some(ErrorKind::Permission),
            Io::InvalidInput | Io::InvalidData => Some(ErrorKind::Validation),
            _ => None,
        }
    }

    fn http_kind(error: &reqwest::Error) -> Option<ErrorKind> {
        if error.is_timeout() {
            return Some(ErrorKind::Timeout);
        }
        if error.is_connect() || error.is_request() {
            return Some(ErrorKind::Network);
        }
        if let Some(status) = error.status() {
            return match status.as_u16() {
                401 | 403 => Some(ErrorKind::Permission),
                400 | 422 => Some(ErrorKind::Validation),
                408 | 504 => Some(ErrorKind::Timeout),
                502 | 503 => Some(ErrorKind::Network),
                _ => None,
            };
        }
        if error.is_decode() {
            return Some(ErrorKind::Validation);
        }
        None
    }

    /// Message rules, first match wins
    fn message_kind(text: &str) -> Option<ErrorKind> {
        let rules: [(&[&str], ErrorKind); 5] = [
            (NETWORK_PATTERNS, ErrorKind::Network),
            (TIMEOUT_PATTERNS, ErrorKind::Timeout),
            (PERMISSION_PATTERNS, ErrorKind::Permission),
            (VALIDATION_PATTERNS, ErrorKind::Validation),
            (RUNTIME_PATTERNS, ErrorKind::Runtime),
        ];

        rules
            .iter()
            .find(|(patterns, _)| patterns.iter().any(|p| text.contains(p)))
            .map(|(_, kind)| *kind)
    }

    fn chain_text(error: &(dyn Error + 'static)) -> String {
        let mut parts = Vec::new();
        let mut current: Option<&(dyn Error + 'static)> = Some(error);
        while let Some(err) = current {
            parts.push(err.to_string().to_lowercase());
            current = err.source();
        }
        parts.join(": ")
    }

    /// Rendered `caused by` chain, `None` when the error has no sources
    fn source_chain(error: &(dyn Error + 'static)) -> Option<String> {
        let mut lines = Vec::new();
        let mut current = error.source();
        while let Some(err) = current {
            lines.push(format!("caused by: {err}"));
            current = err.source();
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    fn degraded_record(
        &self,
        original_message: String,
        context: ErrorContext,
    ) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::Unknown, original_message.clone())
            .with_context_map(context.into_map())
            .with_context(context_keys::CLASSIFIER_FAULT, true)
            .with_context(context_keys::ORIGINAL_MESSAGE, original_message)
            .with_context(context_keys::CLASSIFIED_BY, MatchSource::Default.as_str())
    }

    fn safe_message(error: &(dyn Error + 'static)) -> String {
        catch_unwind(AssertUnwindSafe(|| error.to_string()))
            .or_else(|_| catch_unwind(AssertUnwindSafe(|| format!("{error:?}"))))
            .unwrap_or_else(|_| "<unprintable error>".to_string())
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(&self, error: &(dyn Error + 'static), context: ErrorContext) -> ErrorRecord {
        let fallback_context = context.clone();
        match catch_unwind(AssertUnwindSafe(|| self.classify_error_inner(error, context))) {
            Ok(record) => record,
            Err(_) => self.degraded_record(Self::safe_message(error), fallback_context),
        }
    }

    fn classify_panic(&self, panic: &PanicFailure, context: ErrorContext) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::Runtime, panic.message())
            .with_context_map(context.into_map())
            .with_context(context_keys::CLASSIFIED_BY, MatchSource::Panic.as_str())
    }

    fn classifier_name(&self) -> &'static str {
        "StandardErrorClassifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::ErrorSeverity;
    use std::fmt;

    #[derive(Debug)]
    struct Opaque(&'static str);

    impl fmt::Display for Opaque {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl Error for Opaque {}

    #[derive(Debug)]
    struct ExplodingDisplay;

    impl fmt::Display for ExplodingDisplay {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            panic!("display is broken")
        }
    }

    impl Error for ExplodingDisplay {}

    fn classify(message: &'static str) -> ErrorRecord {
        StandardErrorClassifier::new().classify_error(&Opaque(message), ErrorContext::new())
    }

    #[test]
    fn test_message_rules() {
        assert_eq!(classify("Network request failed").kind(), ErrorKind::Network);
        assert_eq!(classify("request timed out after 30s").kind(), ErrorKind::Timeout);
        assert_eq!(classify("Permission denied for camera").kind(), ErrorKind::Permission);
        assert_eq!(classify("validation failed: email").kind(), ErrorKind::Validation);
        assert_eq!(
            classify("cannot read property of undefined").kind(),
            ErrorKind::Runtime
        );
        assert_eq!(classify("something odd").kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_reference_and_null_access_are_runtime() {
        for message in [
            "ReferenceError: foo is not defined",
            "TypeError: Cannot read properties of null (reading 'id')",
            "cart is not defined",
        ] {
            let record = classify(message);
            assert_eq!(record.kind(), ErrorKind::Runtime, "{message}");
            assert!(!record.is_recoverable(), "{message}");
        }
    }

    #[test]
    fn test_first_rule_wins() {
        // matches both the network and the timeout rule
        let record = classify("connection timed out");
        assert_eq!(record.kind(), ErrorKind::Network);
        assert_eq!(record.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_structured_cause_beats_message() {
        let classifier = StandardErrorClassifier::new();
        let error = CausedError::validation("network payload rejected");
        let record = classifier.classify_error(&error, ErrorContext::new());

        assert_eq!(record.kind(), ErrorKind::Validation);
        assert!(!record.is_recoverable());
        assert_eq!(record.context_value("classified_by"), Some(&"structured".into()));
    }

    #[test]
    fn test_structured_cause_found_in_source_chain() {
        let classifier = StandardErrorClassifier::new();
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "eperm");
        let outer = CausedError::new(crate::classification::ErrorCause::Timeout, "wrapped")
            .with_source(inner);
        let record = classifier.classify_error(&outer, ErrorContext::new());

        assert_eq!(record.kind(), ErrorKind::Timeout);
        assert_eq!(record.stack_trace(), Some("caused by: eperm"));
    }

    #[test]
    fn test_io_error_kinds() {
        let classifier = StandardErrorClassifier::new();
        let cases = [
            (std::io::ErrorKind::ConnectionReset, ErrorKind::Network),
            (std::io::ErrorKind::TimedOut, ErrorKind::Timeout),
            (std::io::ErrorKind::PermissionDenied, ErrorKind::Permission),
            (std::io::ErrorKind::InvalidData, ErrorKind::Validation),
        ];
        for (io_kind, expected) in cases {
            let error = std::io::Error::new(io_kind, "io");
            assert_eq!(
                classifier.classify_error(&error, ErrorContext::new()).kind(),
                expected
            );
        }
    }

    #[test]
    fn test_panic_is_runtime() {
        let record = StandardErrorClassifier::new().classify_panic(
            &PanicFailure::new("called `Option::unwrap()` on a `None` value"),
            ErrorContext::new().component("Header"),
        );
        assert_eq!(record.kind(), ErrorKind::Runtime);
        assert!(!record.is_recoverable());
        assert_eq!(record.context_value("component"), Some(&"Header".into()));
    }

    #[test]
    fn test_context_is_merged() {
        let record = StandardErrorClassifier::new().classify_error(
            &Opaque("dns lookup failed"),
            ErrorContext::new()
                .component("Feed")
                .operation("load_feed")
                .attempt(2)
                .with("region", "eu-west-1"),
        );
        assert_eq!(record.context_value("operation"), Some(&"load_feed".into()));
        assert_eq!(record.context_value("attempt"), Some(&2.into()));
        assert_eq!(record.context_value("region"), Some(&"eu-west-1".into()));
    }

    #[test]
    fn test_classifier_fault_degrades_to_unknown() {
        let record =
            StandardErrorClassifier::new().classify_error(&ExplodingDisplay, ErrorContext::new());

        assert_eq!(record.kind(), ErrorKind::Unknown);
        assert_eq!(record.severity(), ErrorSeverity::Medium);
        assert!(record.is_recoverable());
        assert_eq!(record.context_value("classifier_fault"), Some(&true.into()));
        assert_eq!(
            record.context_value("original_message"),
            Some(&"ExplodingDisplay".into())
        );
    }
}
