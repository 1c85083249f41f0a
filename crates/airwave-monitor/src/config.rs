use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::report::AlertThresholds;

/// Instrumentation and health-report configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Calls slower than this are counted and logged as slow
    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: u64,

    /// Memory budget of this process in MiB; 0 measures against host memory
    #[serde(default)]
    pub memory_budget_mb: u64,

    /// Resident/budget ratio that raises a warning
    #[serde(default = "default_memory_warning_ratio")]
    pub memory_warning_ratio: f64,

    /// Resident/budget ratio that raises a critical alert
    #[serde(default = "default_memory_critical_ratio")]
    pub memory_critical_ratio: f64,

    /// Average query latency that raises a performance warning
    #[serde(default = "default_latency_warning_ms")]
    pub latency_warning_ms: u64,

    /// Request error rate (0.0-1.0) that raises an error warning
    #[serde(default = "default_error_rate_warning")]
    pub error_rate_warning: f64,

    /// Interval of the background report logger in seconds (0 disables it)
    #[serde(default)]
    pub report_interval_secs: u64,
}

fn default_slow_query_threshold_ms() -> u64 {
    1000
}

fn default_memory_warning_ratio() -> f64 {
    0.85
}

fn default_memory_critical_ratio() -> f64 {
    0.95
}

fn default_latency_warning_ms() -> u64 {
    2000
}

fn default_error_rate_warning() -> f64 {
    0.10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: default_slow_query_threshold_ms(),
            memory_budget_mb: 0,
            memory_warning_ratio: default_memory_warning_ratio(),
            memory_critical_ratio: default_memory_critical_ratio(),
            latency_warning_ms: default_latency_warning_ms(),
            error_rate_warning: default_error_rate_warning(),
            report_interval_secs: 0,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.slow_query_threshold_ms == 0 {
            return Err("monitor.slow_query_threshold_ms must be > 0".into());
        }
        let ratios = [
            ("memory_warning_ratio", self.memory_warning_ratio),
            ("memory_critical_ratio", self.memory_critical_ratio),
            ("error_rate_warning", self.error_rate_warning),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("monitor.{name} must be between 0.0 and 1.0"));
            }
        }
        if self.memory_warning_ratio > self.memory_critical_ratio {
            return Err(
                "monitor.memory_warning_ratio must be <= monitor.memory_critical_ratio".into(),
            );
        }
        Ok(())
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }

    /// Memory budget in bytes, `None` when unset.
    pub fn memory_budget(&self) -> Option<u64> {
        (self.memory_budget_mb > 0).then(|| self.memory_budget_mb.saturating_mul(1024 * 1024))
    }

    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval_secs > 0).then(|| Duration::from_secs(self.report_interval_secs))
    }

    pub fn thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            memory_warning_ratio: self.memory_warning_ratio,
            memory_critical_ratio: self.memory_critical_ratio,
            latency_warning_ms: self.latency_warning_ms as f64,
            error_rate_warning: self.error_rate_warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_thresholds() {
        let cfg = MonitorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.slow_query_threshold(), Duration::from_secs(1));
        assert_eq!(cfg.report_interval(), None);
        assert_eq!(cfg.memory_budget(), None);
        assert_eq!(cfg.thresholds(), AlertThresholds::default());
    }

    #[test]
    fn test_validation() {
        let inverted = MonitorConfig {
            memory_warning_ratio: 0.97,
            ..MonitorConfig::default()
        };
        assert!(inverted.validate().unwrap_err().contains("memory_warning_ratio"));

        let out_of_range = MonitorConfig {
            error_rate_warning: 1.5,
            ..MonitorConfig::default()
        };
        assert!(out_of_range.validate().unwrap_err().contains("error_rate_warning"));
    }

    #[test]
    fn test_memory_budget_in_bytes() {
        let cfg = MonitorConfig {
            memory_budget_mb: 512,
            ..MonitorConfig::default()
        };
        assert_eq!(cfg.memory_budget(), Some(512 * 1024 * 1024));
    }
}
