//! # Error Records
//!
//! The immutable value produced by classification. A record is created once per
//! failure and never modified afterwards; builder methods consume `self` and are
//! only used while the record is being assembled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level failure reaching a dependency
    Network,
    /// Deadline exceeded
    Timeout,
    /// Access denied
    Permission,
    /// Input or schema rejected
    Validation,
    /// Program fault (panic)
    Runtime,
    /// Nothing matched
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::Permission,
        ErrorKind::Validation,
        ErrorKind::Runtime,
        ErrorKind::Unknown,
    ];

    /// Severity assigned by the taxonomy
    pub fn severity(self) -> ErrorSeverity {
        match self {
            ErrorKind::Network | ErrorKind::Runtime => ErrorSeverity::High,
            ErrorKind::Timeout | ErrorKind::Permission | ErrorKind::Unknown => {
                ErrorSeverity::Medium
            }
            ErrorKind::Validation => ErrorSeverity::Low,
        }
    }

    /// Whether a retry can plausibly succeed.
    ///
    /// `Unknown` is optimistic: one more attempt is preferred over permanently
    /// blocking the user.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::Validation | ErrorKind::Runtime)
    }

    /// Generic text safe to show end users
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Network => "We couldn't reach the service. Check your connection and try again.",
            ErrorKind::Timeout => "This is taking longer than expected. Please try again.",
            ErrorKind::Permission => "You don't have access to this right now.",
            ErrorKind::Validation => "Some of the information provided couldn't be accepted.",
            ErrorKind::Runtime | ErrorKind::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "Network"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::Permission => write!(f, "Permission"),
            ErrorKind::Validation => write!(f, "Validation"),
            ErrorKind::Runtime => write!(f, "Runtime"),
            ErrorKind::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

impl ErrorSeverity {
    pub const ALL: [ErrorSeverity; 3] = [ErrorSeverity::Low, ErrorSeverity::Medium, ErrorSeverity::High];
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "low"),
            ErrorSeverity::Medium => write!(f, "medium"),
            ErrorSeverity::High => write!(f, "high"),
        }
    }
}

/// Structured description of one failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    id: Uuid,
    kind: ErrorKind,
    severity: ErrorSeverity,
    recoverable: bool,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stack_trace: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    context: HashMap<String, serde_json::Value>,
}

impl ErrorRecord {
    /// Create a record whose severity and recoverability follow the taxonomy
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity: kind.severity(),
            recoverable: kind.is_recoverable(),
            message: message.into(),
            stack_trace: None,
            timestamp: Utc::now(),
            context: HashMap::new(),
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: Option<String>) -> Self {
        self.stack_trace = stack_trace;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_context_map(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context.extend(context);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    /// Text for fallback views; never contains the raw message or trace
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}
