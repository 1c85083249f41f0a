//! Report generation against fixed and failing memory probes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use airwave_monitor::{
    AlertKind, AlertThresholds, HealthReporter, HealthStatus, MemoryProbe, MemorySnapshot,
    MonitorError, QueryInstrumentation, ReportInputs, Severity, spawn_periodic,
};

struct FixedProbe(MemorySnapshot);

impl MemoryProbe for FixedProbe {
    fn snapshot(&self) -> Result<MemorySnapshot, MonitorError> {
        Ok(self.0)
    }
}

struct FailingProbe;

impl MemoryProbe for FailingProbe {
    fn snapshot(&self) -> Result<MemorySnapshot, MonitorError> {
        Err(MonitorError::memory_unavailable("probe offline"))
    }
}

fn snapshot(resident: u64, limit: u64) -> MemorySnapshot {
    MemorySnapshot {
        resident_bytes: resident,
        virtual_bytes: 8 * limit,
        limit_bytes: limit,
    }
}

fn reporter(probe: impl MemoryProbe + 'static) -> (Arc<QueryInstrumentation>, HealthReporter) {
    let instrumentation = Arc::new(QueryInstrumentation::new(Duration::from_millis(1000)));
    let reporter = HealthReporter::new(
        instrumentation.clone(),
        Arc::new(probe),
        AlertThresholds::default(),
    );
    (instrumentation, reporter)
}

#[test]
fn healthy_report_carries_stats_and_memory() {
    let (inst, reporter) = reporter(FixedProbe(snapshot(40, 100)));
    inst.record("ads.active", Duration::from_millis(30));
    inst.record("streams.current", Duration::from_millis(12));

    let report = reporter.generate_report(&ReportInputs::default());

    assert_eq!(report.status(), HealthStatus::Healthy);
    assert!(report.alerts.is_empty());
    assert_eq!(report.query_stats.len(), 2);
    assert_eq!(report.query_stats["ads.active"].count, 1);
    assert_eq!(report.memory_snapshot, Some(snapshot(40, 100)));
}

#[test]
fn failing_probe_still_yields_a_report() {
    let (inst, reporter) = reporter(FailingProbe);
    inst.record("ads.active", Duration::from_millis(2500));

    let report = reporter.generate_report(&ReportInputs::default());

    assert!(report.memory_snapshot.is_none());
    assert_eq!(report.query_stats["ads.active"].slow_count, 1);
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].kind, AlertKind::Performance);
    assert_eq!(report.status(), HealthStatus::Warning);
}

#[test]
fn all_inputs_absent_is_structurally_valid() {
    let (_inst, reporter) = reporter(FailingProbe);

    let report = reporter.generate_report(&ReportInputs::default());
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["status"], "healthy");
    assert!(json["memorySnapshot"].is_null());
    assert_eq!(json["queryStats"], serde_json::json!({}));
    assert_eq!(json["alerts"], serde_json::json!([]));
    assert!(json["generatedAt"].is_string());
}

#[test]
fn alerts_combine_in_order() {
    let (inst, reporter) = reporter(FixedProbe(snapshot(97, 100)));
    inst.record("users.list", Duration::from_millis(2100));

    let inputs = ReportInputs {
        error_rate: Some(0.25),
        primary_store_reachable: Some(false),
        cache_reachable: Some(false),
    };
    let report = reporter.generate_report(&inputs);

    let summary: Vec<_> = report.alerts.iter().map(|a| (a.kind, a.severity)).collect();
    assert_eq!(
        summary,
        vec![
            (AlertKind::Memory, Severity::Critical),
            (AlertKind::Performance, Severity::Warning),
            (AlertKind::Errors, Severity::Warning),
            (AlertKind::Dependency, Severity::Critical),
            (AlertKind::Dependency, Severity::Warning),
        ]
    );
    assert!(report.is_critical());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["alerts"][0]["type"], "memory");
    assert_eq!(json["memorySnapshot"]["residentBytes"], 97);
    assert_eq!(json["queryStats"]["users.list"]["slowCount"], 1);
}

#[test]
fn cache_outage_alone_is_not_critical() {
    let (_inst, reporter) = reporter(FixedProbe(snapshot(10, 100)));
    let inputs = ReportInputs {
        primary_store_reachable: Some(true),
        cache_reachable: Some(false),
        ..ReportInputs::default()
    };

    let report = reporter.generate_report(&inputs);

    assert_eq!(report.status(), HealthStatus::Warning);
    assert!(!report.is_critical());
    assert_eq!(report.alerts[0].kind, AlertKind::Dependency);
}

#[test]
fn report_reflects_reset_instrumentation() {
    let (inst, reporter) = reporter(FixedProbe(snapshot(10, 100)));
    inst.record("ads.active", Duration::from_millis(5000));
    assert_eq!(
        reporter.generate_report(&ReportInputs::default()).status(),
        HealthStatus::Warning
    );

    inst.reset();
    assert_eq!(
        reporter.generate_report(&ReportInputs::default()).status(),
        HealthStatus::Healthy
    );
}

#[tokio::test(start_paused = true)]
async fn periodic_reporter_polls_inputs_each_interval() {
    let (_inst, reporter) = reporter(FixedProbe(snapshot(10, 100)));
    let polls = Arc::new(AtomicUsize::new(0));

    let counter = polls.clone();
    let handle = spawn_periodic(Arc::new(reporter), Duration::from_secs(30), move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            ReportInputs::default()
        }
    });

    // Nothing before the first full interval.
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(polls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(62)).await;
    assert_eq!(polls.load(Ordering::SeqCst), 3);

    handle.abort();
}
