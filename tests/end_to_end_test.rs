//! Full system wiring: retry, breakers, telemetry and boundaries sharing one config

mod common;

use common::{MemoryCollector, ScriptedOperation};
use resilience_core::boundary::Supervised;
use resilience_core::classification::{CausedError, ErrorKind, ErrorRecord};
use resilience_core::config::{CircuitBreakerComponentConfig, ResilienceConfig};
use resilience_core::resilience::{CircuitBreakerError, CircuitState, RetryError};
use resilience_core::{ResilienceSystem, RetryAction};
use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn system_with(collector: Arc<MemoryCollector>) -> ResilienceSystem {
    let mut config = ResilienceConfig::default();
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 100;
    config.circuit_breakers.component_configs.insert(
        "ledger_api".to_string(),
        CircuitBreakerComponentConfig {
            failure_threshold: 5,
            reset_timeout_ms: 10_000,
        },
    );
    ResilienceSystem::with_collector(config, collector).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transient_network_failures_recover_silently() {
    let collector = MemoryCollector::new();
    let mut system = system_with(collector.clone());
    system.start();

    let op = ScriptedOperation::failing_with(vec![
        CausedError::network("connection reset by peer"),
        CausedError::network("connection reset by peer"),
    ]);

    let start = Instant::now();
    let result = system.retry_controller("fetch_balance").execute(|| op.invoke()).await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(op.calls(), 3);
    // 100ms + 200ms of backoff
    assert_eq!(start.elapsed(), Duration::from_millis(300));

    system.shutdown().await;
    assert!(collector.records().is_empty());
    assert_eq!(system.telemetry().diagnostics().reported, 0);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_rejects_sixth_call_without_invoking() {
    let collector = MemoryCollector::new();
    let system = system_with(collector);
    let breaker = system.circuit_breakers().get_circuit_breaker("ledger_api");

    let invocations = AtomicU32::new(0);
    let call = || async {
        invocations.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(CausedError::network("ledger unreachable"))
    };

    for _ in 0..5 {
        let result = breaker.execute(call).await;
        assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let sixth = breaker.execute(call).await;
    assert!(sixth.unwrap_err().is_circuit_open());
    assert_eq!(invocations.load(Ordering::SeqCst), 5);

    let summary = system.circuit_breakers().get_system_metrics();
    assert_eq!(summary.total_rejections(), 1);
    assert!(system.circuit_breakers().system_health_score() < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_non_recoverable_failure_reaches_collector() {
    let collector = MemoryCollector::new();
    let mut system = system_with(collector.clone());
    system.start();

    let op = ScriptedOperation::failing_with(vec![CausedError::validation("iban checksum mismatch")]);
    let error = system
        .retry_controller("submit_transfer")
        .execute(|| op.invoke())
        .await
        .unwrap_err();

    assert!(matches!(error, RetryError::NonRecoverable { .. }));
    assert_eq!(op.calls(), 1);

    system.shutdown().await;
    let records = collector.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind(), ErrorKind::Validation);
    assert_eq!(records[0].context_value("operation"), Some(&"submit_transfer".into()));
}

struct Statement {
    fail: bool,
}

impl Supervised for Statement {
    type View = String;

    fn mount(&mut self) -> Result<String, Box<dyn Error + Send + Sync>> {
        if self.fail {
            return Err(Box::new(CausedError::permission_denied("statement access revoked")));
        }
        Ok("statement".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn test_boundary_reports_through_shared_sink() {
    let collector = MemoryCollector::new();
    let mut system = system_with(collector.clone());
    system.start();

    let mut boundary = system.boundary(
        "StatementView",
        Statement { fail: true },
        |record: &ErrorRecord, _: RetryAction| record.user_message().to_string(),
    );
    assert!(boundary.render().is_fallback());
    assert_eq!(system.failure_hub().subscriber_count(), 1);

    system
        .failure_hub()
        .spawn_supervised(async { Err::<(), _>(CausedError::timeout("late")) })
        .await
        .unwrap();

    system.shutdown().await;

    // the boundary was already failed, so the async failure goes unclaimed
    let kinds: Vec<_> = collector.records().iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![ErrorKind::Permission, ErrorKind::Timeout]);
    let last = collector.records().pop().unwrap();
    assert_eq!(last.context_value("channel"), Some(&"unclaimed".into()));
}
