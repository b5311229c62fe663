//! Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use resilience_core::classification::{CausedError, ErrorRecord};
use resilience_core::config::TelemetryConfig;
use resilience_core::telemetry::{CollectorError, CollectorResult, TelemetryCollector, TelemetrySink};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Collector that keeps every delivered batch in memory
#[derive(Debug, Default)]
pub struct MemoryCollector {
    batches: Mutex<Vec<Vec<ErrorRecord>>>,
}

impl MemoryCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batches(&self) -> Vec<Vec<ErrorRecord>> {
        self.batches.lock().clone()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|r| r.message().to_string())
            .collect()
    }
}

#[async_trait]
impl TelemetryCollector for MemoryCollector {
    async fn send_batch(&self, records: &[ErrorRecord]) -> CollectorResult<()> {
        self.batches.lock().push(records.to_vec());
        Ok(())
    }

    fn collector_name(&self) -> &'static str {
        "memory"
    }
}

/// Collector whose flushes fail a scripted number of times before succeeding
#[derive(Debug, Default)]
pub struct FlakyCollector {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<ErrorRecord>>,
}

impl FlakyCollector {
    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(times),
            ..Default::default()
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered_messages(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|r| r.message().to_string())
            .collect()
    }
}

#[async_trait]
impl TelemetryCollector for FlakyCollector {
    async fn send_batch(&self, records: &[ErrorRecord]) -> CollectorResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(CollectorError::Unavailable("collector offline".to_string()));
        }
        self.delivered.lock().extend(records.iter().cloned());
        Ok(())
    }

    fn collector_name(&self) -> &'static str {
        "flaky"
    }
}

/// Telemetry sink around `collector` with the given queue shape
pub fn sink_with(
    collector: Arc<dyn TelemetryCollector>,
    queue_capacity: usize,
    batch_size: usize,
) -> Arc<TelemetrySink> {
    let config = TelemetryConfig {
        queue_capacity,
        batch_size,
        ..Default::default()
    };
    Arc::new(TelemetrySink::new(collector, &config))
}

/// Operation script: pops the next outcome on each call, succeeding once exhausted
#[derive(Debug, Clone)]
pub struct ScriptedOperation {
    outcomes: Arc<Mutex<VecDeque<CausedError>>>,
    calls: Arc<AtomicU32>,
}

impl ScriptedOperation {
    pub fn failing_with(errors: Vec<CausedError>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(errors.into())),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn invoke(&self) -> Result<&'static str, CausedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok("ok"),
        }
    }
}
