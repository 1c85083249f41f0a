//! Cache counters emitted through the `metrics` facade.
//!
//! Nothing is recorded unless the host process installs a recorder
//! (see `airwave_monitor::metrics::init_metrics`).

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
    pub const CACHE_REMOTE_ERRORS_TOTAL: &str = "cache_remote_errors_total";
}

pub const TIER_LOCAL: &str = "L1";
pub const TIER_REMOTE: &str = "L2";

/// Record a cache hit.
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a miss on every tier.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a failed shared-tier operation.
pub fn record_remote_error(operation: &'static str) {
    counter!(names::CACHE_REMOTE_ERRORS_TOTAL, "operation" => operation).increment(1);
}

/// Set the number of cache entries.
pub fn set_cache_entries(tier: &'static str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier).set(count as f64);
}
