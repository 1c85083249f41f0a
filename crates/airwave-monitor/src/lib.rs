//! Query latency instrumentation and health reporting.
//!
//! - [`QueryInstrumentation`] times named operations and keeps a running
//!   [`QueryStat`] per name.
//! - [`HealthReporter`] turns those aggregates, a memory snapshot and
//!   caller-supplied inputs into a [`HealthReport`] with alerts.
//! - [`metrics`] installs the Prometheus recorder and names every series.
//!
//! Nothing here fails its caller: measurement is passive and report
//! generation degrades to a partial report.

pub mod config;
pub mod error;
pub mod instrumentation;
pub mod memory;
pub mod metrics;
pub mod report;

pub use config::MonitorConfig;
pub use error::MonitorError;
pub use instrumentation::{DEFAULT_SLOW_THRESHOLD, QueryInstrumentation, QueryStat};
pub use memory::{MemoryProbe, MemorySnapshot, SystemMemoryProbe};
pub use report::{
    Alert, AlertKind, AlertThresholds, HealthReport, HealthReporter, HealthStatus, ReportInputs,
    Severity, evaluate_alerts, spawn_periodic,
};
