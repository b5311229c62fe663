//! # Error Telemetry Sink
//!
//! Buffers [`ErrorRecord`]s in a bounded in-memory queue and forwards them to a
//! [`TelemetryCollector`] in batches.
//!
//! ## Guarantees
//!
//! - `report` never blocks on I/O and never fails.
//! - The queue never exceeds its capacity; when full the oldest record is evicted.
//! - A batch whose delivery fails transiently is requeued once (behind newer
//!   records) and dropped if it fails again. A permanent rejection drops it at once.
//!
//! ```text
//! report() ──▶ [ArrayQueue] ──(interval | batch full | shutdown)──▶ flush() ──▶ collector
//!                    ▲                                               │
//!                    └──────────── requeue once on failure ◀─────────┘
//! ```

use crate::classification::{ErrorKind, ErrorRecord, ErrorSeverity};
use crate::config::TelemetryConfig;
use crate::logging::log_telemetry_flush;
use crate::telemetry::{
    CollectorResult, HttpCollector, TelemetryCollector, TelemetryDiagnostics, TracingCollector,
};
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct QueuedRecord {
    record: ErrorRecord,
    requeued: bool,
}

#[derive(Debug, Default)]
struct SinkCounters {
    reported: AtomicU64,
    delivered: AtomicU64,
    evicted: AtomicU64,
    dropped: AtomicU64,
    flush_failures: AtomicU64,
    by_severity: [AtomicU64; ErrorSeverity::ALL.len()],
    by_kind: [AtomicU64; ErrorKind::ALL.len()],
}

impl SinkCounters {
    fn record_reported(&self, record: &ErrorRecord) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = ErrorSeverity::ALL
            .iter()
            .position(|s| *s == record.severity())
            .and_then(|idx| self.by_severity.get(idx))
        {
            slot.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(slot) = ErrorKind::ALL
            .iter()
            .position(|k| *k == record.kind())
            .and_then(|idx| self.by_kind.get(idx))
        {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Result of a single flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// Another flush was already running
    pub skipped: bool,
}

impl FlushOutcome {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.requeued == 0 && self.dropped == 0
    }

    pub fn failed(&self) -> bool {
        self.requeued > 0 || self.dropped > 0
    }
}

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Bounded, batching error sink
#[derive(Debug)]
pub struct TelemetrySink {
    queue: ArrayQueue<QueuedRecord>,
    collector: Arc<dyn TelemetryCollector>,
    enabled: bool,
    batch_size: usize,
    flush_interval: Duration,
    recent_window: usize,
    recent: Mutex<VecDeque<ErrorRecord>>,
    counters: SinkCounters,
    flush_notify: Notify,
    flush_lock: tokio::sync::Mutex<()>,
}

impl TelemetrySink {
    pub fn new(collector: Arc<dyn TelemetryCollector>, config: &TelemetryConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        info!(
            collector = collector.collector_name(),
            enabled = config.enabled,
            queue_capacity = capacity,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            "Telemetry sink initialized"
        );

        Self {
            queue: ArrayQueue::new(capacity),
            collector,
            enabled: config.enabled,
            batch_size: config.batch_size.clamp(1, capacity),
            // tokio's interval panics on a zero period
            flush_interval: config.flush_interval().max(MIN_FLUSH_INTERVAL),
            recent_window: config.recent_window,
            recent: Mutex::new(VecDeque::with_capacity(config.recent_window)),
            counters: SinkCounters::default(),
            flush_notify: Notify::new(),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build with an HTTP collector when an endpoint is configured, else log locally
    pub fn from_config(config: &TelemetryConfig) -> CollectorResult<Self> {
        let collector: Arc<dyn TelemetryCollector> = match HttpCollector::from_config(config)? {
            Some(http) => Arc::new(http),
            None => Arc::new(TracingCollector),
        };
        Ok(Self::new(collector, config))
    }

    /// Enqueue a record. Never blocks on I/O and never fails.
    pub fn report(&self, record: ErrorRecord) {
        if !self.enabled {
            return;
        }

        self.counters.record_reported(&record);
        if self.recent_window > 0 {
            let mut recent = self.recent.lock();
            if recent.len() == self.recent_window {
                recent.pop_front();
            }
            recent.push_back(record.clone());
        }

        self.enqueue(QueuedRecord {
            record,
            requeued: false,
        });

        if self.queue.len() >= self.batch_size {
            self.flush_notify.notify_one();
        }
    }

    fn enqueue(&self, queued: QueuedRecord) {
        if let Some(evicted) = self.queue.force_push(queued) {
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(
                error_id = %evicted.record.id(),
                "Telemetry queue full, evicted oldest record"
            );
        }
    }

    /// Send up to one batch to the collector
    pub async fn flush(&self) -> FlushOutcome {
        let Ok(_guard) = self.flush_lock.try_lock() else {
            return FlushOutcome {
                skipped: true,
                ..Default::default()
            };
        };

        let mut records = Vec::with_capacity(self.batch_size);
        let mut requeued_flags = Vec::with_capacity(self.batch_size);
        while records.len() < self.batch_size {
            match self.queue.pop() {
                Some(queued) => {
                    records.push(queued.record);
                    requeued_flags.push(queued.requeued);
                }
                None => break,
            }
        }

        if records.is_empty() {
            return FlushOutcome::default();
        }

        let mut outcome = FlushOutcome::default();
        match self.collector.send_batch(&records).await {
            Ok(()) => {
                outcome.delivered = records.len();
                self.counters
                    .delivered
                    .fetch_add(records.len() as u64, Ordering::Relaxed);
            }
            Err(error) => {
                self.counters.flush_failures.fetch_add(1, Ordering::Relaxed);
                let transient = error.is_transient();
                warn!(
                    collector = self.collector.collector_name(),
                    batch_size = records.len(),
                    transient = transient,
                    error = %error,
                    "Telemetry flush failed"
                );

                for (record, already_requeued) in records.into_iter().zip(requeued_flags) {
                    if already_requeued || !transient {
                        outcome.dropped += 1;
                    } else {
                        outcome.requeued += 1;
                        self.enqueue(QueuedRecord {
                            record,
                            requeued: true,
                        });
                    }
                }
                self.counters
                    .dropped
                    .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
            }
        }

        log_telemetry_flush(
            self.collector.collector_name(),
            outcome.delivered,
            outcome.requeued,
            outcome.dropped,
        );
        outcome
    }

    /// Flush until the queue is empty or a flush fails
    pub async fn flush_all(&self) -> FlushOutcome {
        let mut total = FlushOutcome::default();
        loop {
            let outcome = self.flush().await;
            total.delivered += outcome.delivered;
            total.requeued += outcome.requeued;
            total.dropped += outcome.dropped;
            if outcome.skipped || outcome.is_empty() || outcome.failed() {
                total.skipped |= outcome.skipped;
                return total;
            }
        }
    }

    /// Start the background flusher
    pub fn start(self: &Arc<Self>) -> TelemetryFlusherHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let sink = Arc::clone(self);

        let join_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sink.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            info!(
                flush_interval_ms = sink.flush_interval.as_millis() as u64,
                "Telemetry flusher started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        let outcome = sink.flush_all().await;
                        info!(
                            delivered = outcome.delivered,
                            remaining = sink.queue.len(),
                            "Telemetry flusher stopped"
                        );
                        break;
                    }
                    _ = ticker.tick() => {
                        sink.flush().await;
                    }
                    _ = sink.flush_notify.notified() => {
                        sink.flush().await;
                    }
                }
            }
        });

        TelemetryFlusherHandle {
            shutdown_tx,
            join_handle,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Most recent records, oldest first
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn diagnostics(&self) -> TelemetryDiagnostics {
        TelemetryDiagnostics {
            queued: self.queue.len(),
            capacity: self.queue.capacity(),
            reported: self.counters.reported.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            flush_failures: self.counters.flush_failures.load(Ordering::Relaxed),
            severity_distribution: ErrorSeverity::ALL
                .iter()
                .zip(self.counters.by_severity.iter())
                .map(|(severity, count)| (*severity, count.load(Ordering::Relaxed)))
                .collect(),
            kind_distribution: ErrorKind::ALL
                .iter()
                .zip(self.counters.by_kind.iter())
                .map(|(kind, count)| (*kind, count.load(Ordering::Relaxed)))
                .collect(),
            recent: self.recent_errors(),
        }
    }
}

/// Controls the background flusher started by [`TelemetrySink::start`]
#[derive(Debug)]
pub struct TelemetryFlusherHandle {
    shutdown_tx: broadcast::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl TelemetryFlusherHandle {
    /// Signal shutdown, wait for the final flush
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Telemetry flusher already stopped");
        }
        if let Err(e) = self.join_handle.await {
            warn!(error = %e, "Telemetry flusher task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::CollectorError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Default)]
    struct RecordingCollector {
        batches: Mutex<Vec<Vec<String>>>,
        fail: AtomicBool,
        reject: AtomicBool,
    }

    #[async_trait]
    impl TelemetryCollector for RecordingCollector {
        async fn send_batch(&self, records: &[ErrorRecord]) -> CollectorResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CollectorError::Unavailable("collector down".to_string()));
            }
            if self.reject.load(Ordering::SeqCst) {
                return Err(CollectorError::Rejected {
                    status: 400,
                    message: "unknown field".to_string(),
                });
            }
            self.batches
                .lock()
                .push(records.iter().map(|r| r.message().to_string()).collect());
            Ok(())
        }

        fn collector_name(&self) -> &'static str {
            "recording"
        }
    }

    fn config(capacity: usize, batch_size: usize) -> TelemetryConfig {
        TelemetryConfig {
            queue_capacity: capacity,
            batch_size,
            recent_window: 2,
            ..Default::default()
        }
    }

    fn record(message: &str) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::Network, message)
    }

    #[tokio::test]
    async fn test_evicts_oldest_when_full() {
        let collector = Arc::new(RecordingCollector::default());
        let sink = TelemetrySink::new(collector.clone(), &config(3, 3));

        for i in 0..5 {
            sink.report(record(&format!("e{i}")));
        }
        assert_eq!(sink.queue_len(), 3);
        assert_eq!(sink.diagnostics().evicted, 2);

        sink.flush().await;
        assert_eq!(collector.batches.lock()[0], vec!["e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn test_failed_batch_requeued_once_then_dropped() {
        let collector = Arc::new(RecordingCollector::default());
        collector.fail.store(true, Ordering::SeqCst);
        let sink = TelemetrySink::new(collector.clone(), &config(10, 10));

        sink.report(record("a"));
        sink.report(record("b"));

        let first = sink.flush().await;
        assert_eq!(first.requeued, 2);
        assert_eq!(sink.queue_len(), 2);

        let second = sink.flush().await;
        assert_eq!(second.dropped, 2);
        assert_eq!(sink.queue_len(), 0);

        let diagnostics = sink.diagnostics();
        assert_eq!(diagnostics.dropped, 2);
        assert_eq!(diagnostics.flush_failures, 2);
        assert!(collector.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_rejection_drops_batch_immediately() {
        let collector = Arc::new(RecordingCollector::default());
        collector.reject.store(true, Ordering::SeqCst);
        let sink = TelemetrySink::new(collector.clone(), &config(10, 10));

        sink.report(record("a"));
        sink.report(record("b"));

        let outcome = sink.flush().await;
        assert_eq!(outcome.requeued, 0);
        assert_eq!(outcome.dropped, 2);
        assert_eq!(sink.queue_len(), 0);
        assert_eq!(sink.diagnostics().dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_flush_interval_is_clamped() {
        let collector = Arc::new(RecordingCollector::default());
        let config = TelemetryConfig {
            flush_interval_ms: 0,
            ..config(10, 10)
        };
        let sink = Arc::new(TelemetrySink::new(collector.clone(), &config));
        let handle = sink.start();

        sink.report(record("a"));
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(!handle.is_finished());
        assert_eq!(collector.batches.lock().as_slice(), &[vec!["a".to_string()]]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_recent_window_and_distribution() {
        let sink = TelemetrySink::new(Arc::new(RecordingCollector::default()), &config(10, 10));
        sink.report(record("a"));
        sink.report(ErrorRecord::new(ErrorKind::Validation, "b"));
        sink.report(ErrorRecord::new(ErrorKind::Timeout, "c"));

        let diagnostics = sink.diagnostics();
        let recent: Vec<_> = diagnostics.recent.iter().map(|r| r.message()).collect();
        assert_eq!(recent, vec!["b", "c"]);
        assert_eq!(diagnostics.severity_count(ErrorSeverity::High), 1);
        assert_eq!(diagnostics.severity_count(ErrorSeverity::Low), 1);
        assert_eq!(diagnostics.kind_count(ErrorKind::Timeout), 1);
    }

    #[tokio::test]
    async fn test_disabled_sink_ignores_reports() {
        let config = TelemetryConfig {
            enabled: false,
            ..Default::default()
        };
        let sink = TelemetrySink::new(Arc::new(RecordingCollector::default()), &config);
        sink.report(record("ignored"));
        assert_eq!(sink.queue_len(), 0);
        assert_eq!(sink.diagnostics().reported, 0);
    }
}
