//! Local, on-demand view of what the sink has seen.

use crate::classification::{ErrorKind, ErrorRecord, ErrorSeverity};
use serde::Serialize;
use std::collections::HashMap;

/// Snapshot of sink counters and recent records
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryDiagnostics {
    pub queued: usize,
    pub capacity: usize,
    pub reported: u64,
    pub delivered: u64,
    /// Evicted from a full queue before delivery
    pub evicted: u64,
    /// Dropped after their single requeue also failed
    pub dropped: u64,
    pub flush_failures: u64,
    pub severity_distribution: HashMap<ErrorSeverity, u64>,
    pub kind_distribution: HashMap<ErrorKind, u64>,
    /// Most recent records, oldest first
    pub recent: Vec<ErrorRecord>,
}

impl TelemetryDiagnostics {
    /// Records that were reported but never reached the collector
    pub fn lost(&self) -> u64 {
        self.evicted + self.dropped
    }

    pub fn severity_count(&self, severity: ErrorSeverity) -> u64 {
        self.severity_distribution.get(&severity).copied().unwrap_or(0)
    }

    pub fn kind_count(&self, kind: ErrorKind) -> u64 {
        self.kind_distribution.get(&kind).copied().unwrap_or(0)
    }
}
