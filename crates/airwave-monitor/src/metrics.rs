//! Prometheus metrics for Airwave.
//!
//! This module provides:
//! - Query latency metrics (duration histogram, slow-call counter)
//! - Memory and health gauges fed by the reporter
//! - The Prometheus recorder and text rendering

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use crate::memory::MemorySnapshot;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Query metrics
    pub const QUERY_DURATION_SECONDS: &str = "query_duration_seconds";
    pub const SLOW_QUERIES_TOTAL: &str = "slow_queries_total";

    // Process metrics
    pub const PROCESS_RESIDENT_MEMORY_BYTES: &str = "process_resident_memory_bytes";
    pub const PROCESS_VIRTUAL_MEMORY_BYTES: &str = "process_virtual_memory_bytes";
    pub const PROCESS_MEMORY_LIMIT_BYTES: &str = "process_memory_limit_bytes";

    // Health metrics
    pub const HEALTH_ALERTS: &str = "health_alerts";
}

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at startup.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: the server renders /metrics itself
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Record one measured operation.
pub fn record_query(operation: &str, duration: Duration, slow: bool) {
    histogram!(names::QUERY_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration.as_secs_f64());

    if slow {
        counter!(names::SLOW_QUERIES_TOTAL, "operation" => operation.to_string()).increment(1);
    }
}

/// Publish the memory figures from a report.
pub fn record_memory(snapshot: &MemorySnapshot) {
    gauge!(names::PROCESS_RESIDENT_MEMORY_BYTES).set(snapshot.resident_bytes as f64);
    gauge!(names::PROCESS_VIRTUAL_MEMORY_BYTES).set(snapshot.virtual_bytes as f64);
    gauge!(names::PROCESS_MEMORY_LIMIT_BYTES).set(snapshot.limit_bytes as f64);
}

/// Set the number of active alerts at a severity.
pub fn set_alert_count(severity: &'static str, count: usize) {
    gauge!(names::HEALTH_ALERTS, "severity" => severity).set(count as f64);
}
