//! Health reports and threshold alerts.
//!
//! [`HealthReporter::generate_report`] is the only place that decides
//! whether the process is healthy. It reads the instrumentation aggregates,
//! takes a memory snapshot and compares both, plus any caller-supplied
//! inputs, against [`AlertThresholds`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::instrumentation::{QueryInstrumentation, QueryStat};
use crate::memory::{MemoryProbe, MemorySnapshot};
use crate::metrics;

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Memory,
    Performance,
    Errors,
    Dependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
}

impl Alert {
    fn new(kind: AlertKind, severity: Severity, message: String) -> Self {
        Self {
            kind,
            severity,
            message,
        }
    }
}

/// Overall verdict of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Limits above which alerts are raised. All comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub memory_warning_ratio: f64,
    pub memory_critical_ratio: f64,
    pub latency_warning_ms: f64,
    pub error_rate_warning: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            memory_warning_ratio: 0.85,
            memory_critical_ratio: 0.95,
            latency_warning_ms: 2000.0,
            error_rate_warning: 0.10,
        }
    }
}

/// Figures only the caller knows. `None` means "not measured" and raises
/// nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReportInputs {
    /// Fraction of failed requests, 0.0-1.0.
    pub error_rate: Option<f64>,
    /// Whether the primary backing store answered.
    pub primary_store_reachable: Option<bool>,
    /// Whether the shared cache tier answered. The cache fails open, so an
    /// outage only warns.
    pub cache_reachable: Option<bool>,
}

/// Point-in-time health snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub query_stats: BTreeMap<String, QueryStat>,
    pub memory_snapshot: Option<MemorySnapshot>,
    pub alerts: Vec<Alert>,
    pub status: HealthStatus,
}

impl HealthReport {
    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn is_critical(&self) -> bool {
        self.status == HealthStatus::Critical
    }
}

/// Derive the overall status from a list of alerts.
pub fn status_of(alerts: &[Alert]) -> HealthStatus {
    match alerts.iter().map(|alert| alert.severity).max() {
        None => HealthStatus::Healthy,
        Some(Severity::Warning) => HealthStatus::Warning,
        Some(Severity::Critical) => HealthStatus::Critical,
    }
}

/// Compare the collected figures against `thresholds`.
///
/// Alerts come out in a fixed order: memory, performance, errors, dependency.
/// Only memory alerts and an unreachable primary store are critical.
pub fn evaluate_alerts(
    thresholds: &AlertThresholds,
    memory: Option<&MemorySnapshot>,
    aggregate_avg_ms: Option<f64>,
    inputs: &ReportInputs,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if let Some(ratio) = memory.and_then(MemorySnapshot::usage_ratio) {
        let severity = if ratio > thresholds.memory_critical_ratio {
            Some(Severity::Critical)
        } else if ratio > thresholds.memory_warning_ratio {
            Some(Severity::Warning)
        } else {
            None
        };
        if let Some(severity) = severity {
            alerts.push(Alert::new(
                AlertKind::Memory,
                severity,
                format!("memory usage at {:.1}%", ratio * 100.0),
            ));
        }
    }

    if let Some(avg) = aggregate_avg_ms
        && avg > thresholds.latency_warning_ms
    {
        alerts.push(Alert::new(
            AlertKind::Performance,
            Severity::Warning,
            format!(
                "average query latency {avg:.0}ms exceeds {:.0}ms",
                thresholds.latency_warning_ms
            ),
        ));
    }

    if let Some(rate) = inputs.error_rate.filter(|rate| rate.is_finite())
        && rate > thresholds.error_rate_warning
    {
        alerts.push(Alert::new(
            AlertKind::Errors,
            Severity::Warning,
            format!("error rate at {:.1}%", rate * 100.0),
        ));
    }

    if inputs.primary_store_reachable == Some(false) {
        alerts.push(Alert::new(
            AlertKind::Dependency,
            Severity::Critical,
            "primary store is unreachable".to_string(),
        ));
    }

    if inputs.cache_reachable == Some(false) {
        alerts.push(Alert::new(
            AlertKind::Dependency,
            Severity::Warning,
            "shared cache tier is unreachable, serving from the local tier".to_string(),
        ));
    }

    alerts
}

/// Builds [`HealthReport`]s from live state.
pub struct HealthReporter {
    instrumentation: Arc<QueryInstrumentation>,
    probe: Arc<dyn MemoryProbe>,
    thresholds: AlertThresholds,
}

impl HealthReporter {
    pub fn new(
        instrumentation: Arc<QueryInstrumentation>,
        probe: Arc<dyn MemoryProbe>,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            instrumentation,
            probe,
            thresholds,
        }
    }

    pub fn instrumentation(&self) -> &Arc<QueryInstrumentation> {
        &self.instrumentation
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Assemble a fresh report.
    ///
    /// Never fails: a memory probe error leaves `memory_snapshot` empty and
    /// the rest of the report intact.
    pub fn generate_report(&self, inputs: &ReportInputs) -> HealthReport {
        let query_stats = self.instrumentation.stats();

        let memory_snapshot = match self.probe.snapshot() {
            Ok(snapshot) => {
                metrics::record_memory(&snapshot);
                Some(snapshot)
            }
            Err(e) => {
                tracing::debug!(error = %e, "memory snapshot unavailable");
                None
            }
        };

        let alerts = evaluate_alerts(
            &self.thresholds,
            memory_snapshot.as_ref(),
            self.instrumentation.aggregate_avg_ms(),
            inputs,
        );

        for severity in [Severity::Warning, Severity::Critical] {
            let count = alerts.iter().filter(|a| a.severity == severity).count();
            metrics::set_alert_count(severity.as_str(), count);
        }

        HealthReport {
            generated_at: OffsetDateTime::now_utc(),
            query_stats,
            memory_snapshot,
            status: status_of(&alerts),
            alerts,
        }
    }
}

/// Generate a report every `every` and log its alerts.
///
/// `inputs` is called before each report to collect the caller-side figures.
/// The first report is produced after one full interval.
pub fn spawn_periodic<F, Fut>(
    reporter: Arc<HealthReporter>,
    every: Duration,
    inputs: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ReportInputs> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = reporter.generate_report(&inputs().await);
            log_report(&report);
        }
    })
}

fn log_report(report: &HealthReport) {
    if report.alerts.is_empty() {
        tracing::debug!(
            operations = report.query_stats.len(),
            "health report: healthy"
        );
        return;
    }

    for alert in &report.alerts {
        match alert.severity {
            Severity::Warning => tracing::warn!(
                kind = ?alert.kind,
                message = %alert.message,
                "health alert"
            ),
            Severity::Critical => tracing::error!(
                kind = ?alert.kind,
                message = %alert.message,
                "health alert"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(resident: u64, limit: u64) -> MemorySnapshot {
        MemorySnapshot {
            resident_bytes: resident,
            virtual_bytes: 4 * limit,
            limit_bytes: limit,
        }
    }

    fn kinds(alerts: &[Alert]) -> Vec<(AlertKind, Severity)> {
        alerts.iter().map(|a| (a.kind, a.severity)).collect()
    }

    #[test]
    fn test_memory_bands() {
        let t = AlertThresholds::default();
        let none = ReportInputs::default();

        assert!(evaluate_alerts(&t, Some(&memory(85, 100)), None, &none).is_empty());
        assert_eq!(
            kinds(&evaluate_alerts(&t, Some(&memory(86, 100)), None, &none)),
            vec![(AlertKind::Memory, Severity::Warning)]
        );
        assert_eq!(
            kinds(&evaluate_alerts(&t, Some(&memory(95, 100)), None, &none)),
            vec![(AlertKind::Memory, Severity::Warning)]
        );
        assert_eq!(
            kinds(&evaluate_alerts(&t, Some(&memory(96, 100)), None, &none)),
            vec![(AlertKind::Memory, Severity::Critical)]
        );
    }

    #[test]
    fn test_latency_and_error_rate_only_warn() {
        let t = AlertThresholds::default();
        let inputs = ReportInputs {
            error_rate: Some(0.9),
            ..ReportInputs::default()
        };

        let alerts = evaluate_alerts(&t, None, Some(9000.0), &inputs);
        assert_eq!(
            kinds(&alerts),
            vec![
                (AlertKind::Performance, Severity::Warning),
                (AlertKind::Errors, Severity::Warning),
            ]
        );
        assert_eq!(status_of(&alerts), HealthStatus::Warning);

        let at_limit = ReportInputs {
            error_rate: Some(0.10),
            ..inputs
        };
        assert!(evaluate_alerts(&t, None, Some(2000.0), &at_limit).is_empty());
    }

    #[test]
    fn test_unreachable_store_is_critical() {
        let t = AlertThresholds::default();
        let down = ReportInputs {
            primary_store_reachable: Some(false),
            ..ReportInputs::default()
        };
        let up = ReportInputs {
            primary_store_reachable: Some(true),
            ..down
        };

        let alerts = evaluate_alerts(&t, None, None, &down);
        assert_eq!(kinds(&alerts), vec![(AlertKind::Dependency, Severity::Critical)]);
        assert_eq!(status_of(&alerts), HealthStatus::Critical);
        assert!(evaluate_alerts(&t, None, None, &up).is_empty());
    }

    #[test]
    fn test_unreachable_cache_only_warns() {
        let t = AlertThresholds::default();
        let cache_down = ReportInputs {
            primary_store_reachable: Some(true),
            cache_reachable: Some(false),
            ..ReportInputs::default()
        };

        let alerts = evaluate_alerts(&t, None, None, &cache_down);
        assert_eq!(kinds(&alerts), vec![(AlertKind::Dependency, Severity::Warning)]);
        assert_eq!(status_of(&alerts), HealthStatus::Warning);

        let both_down = ReportInputs {
            primary_store_reachable: Some(false),
            ..cache_down
        };
        assert_eq!(
            kinds(&evaluate_alerts(&t, None, None, &both_down)),
            vec![
                (AlertKind::Dependency, Severity::Critical),
                (AlertKind::Dependency, Severity::Warning),
            ]
        );
    }

    #[test]
    fn test_non_finite_error_rate_is_ignored() {
        let t = AlertThresholds::default();
        let inputs = ReportInputs {
            error_rate: Some(f64::NAN),
            ..ReportInputs::default()
        };
        assert!(evaluate_alerts(&t, None, None, &inputs).is_empty());
    }

    #[test]
    fn test_alert_serialization() {
        let alert = Alert::new(AlertKind::Dependency, Severity::Critical, "down".into());
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "dependency", "severity": "critical", "message": "down"})
        );
    }
}
