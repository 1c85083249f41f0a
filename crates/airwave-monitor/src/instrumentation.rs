//! Per-operation latency aggregation.
//!
//! Every measured call updates a running [`QueryStat`] for its operation
//! name; individual samples are never retained.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::metrics;

/// Default duration above which a call counts as slow.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(1000);

/// Running latency aggregate for one operation name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStat {
    pub name: String,
    pub count: u64,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
    pub slow_count: u64,
}

impl QueryStat {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            count: 0,
            total_time_ms: 0.0,
            avg_time_ms: 0.0,
            min_time_ms: 0.0,
            max_time_ms: 0.0,
            slow_count: 0,
        }
    }

    fn observe(&mut self, duration_ms: f64, slow: bool) {
        if self.count == 0 {
            self.min_time_ms = duration_ms;
            self.max_time_ms = duration_ms;
        } else {
            self.min_time_ms = self.min_time_ms.min(duration_ms);
            self.max_time_ms = self.max_time_ms.max(duration_ms);
        }
        self.count += 1;
        self.total_time_ms += duration_ms;
        self.avg_time_ms = self.total_time_ms / self.count as f64;
        if slow {
            self.slow_count += 1;
        }
    }
}

/// Times named operations and keeps their aggregates.
///
/// One instance is shared per process (wrap it in `Arc`). Updates lock only
/// the map shard holding the operation, so concurrent callers of different
/// operations rarely contend.
pub struct QueryInstrumentation {
    stats: DashMap<String, QueryStat>,
    slow_threshold: Duration,
}

impl QueryInstrumentation {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            stats: DashMap::new(),
            slow_threshold,
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Time an async operation.
    ///
    /// The output, `Ok` or `Err`, is returned untouched. A future dropped
    /// before completion is recorded with the time it ran.
    pub async fn measure<T, F, Fut>(&self, name: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _timer = Timer::start(self, name);
        f().await
    }

    /// Time a synchronous operation.
    pub fn measure_sync<T, F>(&self, name: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _timer = Timer::start(self, name);
        f()
    }

    /// Fold one observed duration into the aggregate for `name`.
    pub fn record(&self, name: &str, duration: Duration) {
        let duration_ms = duration.as_nanos() as f64 / 1_000_000.0;
        let slow = duration > self.slow_threshold;

        self.stats
            .entry(name.to_string())
            .or_insert_with(|| QueryStat::new(name))
            .observe(duration_ms, slow);

        metrics::record_query(name, duration, slow);

        if slow {
            tracing::warn!(
                operation = %name,
                duration_ms,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "slow query"
            );
        }
    }

    /// Snapshot of every aggregate, detached from internal state.
    pub fn stats(&self) -> BTreeMap<String, QueryStat> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn stat(&self, name: &str) -> Option<QueryStat> {
        self.stats.get(name).map(|entry| entry.value().clone())
    }

    /// Total calls observed across all operations.
    pub fn total_calls(&self) -> u64 {
        self.stats.iter().map(|entry| entry.count).sum()
    }

    /// Call-weighted average latency across all operations.
    pub fn aggregate_avg_ms(&self) -> Option<f64> {
        let (count, total) = self
            .stats
            .iter()
            .fold((0u64, 0.0f64), |(count, total), entry| {
                (count + entry.count, total + entry.total_time_ms)
            });
        (count > 0).then(|| total / count as f64)
    }

    /// Drop every aggregate.
    pub fn reset(&self) {
        self.stats.clear();
    }
}

impl Default for QueryInstrumentation {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_THRESHOLD)
    }
}

/// Records the elapsed time when dropped, so early returns, errors and
/// unwinding are all timed.
struct Timer<'a> {
    instrumentation: &'a QueryInstrumentation,
    name: &'a str,
    start: Instant,
}

impl<'a> Timer<'a> {
    fn start(instrumentation: &'a QueryInstrumentation, name: &'a str) -> Self {
        Self {
            instrumentation,
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.instrumentation
            .record(self.name, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_record_aggregates() {
        let inst = QueryInstrumentation::new(ms(1000));
        for d in [120, 40, 1500, 300, 2500] {
            inst.record("ads.active", ms(d));
        }

        let stat = inst.stat("ads.active").unwrap();
        assert_eq!(stat.count, 5);
        assert_eq!(stat.min_time_ms, 40.0);
        assert_eq!(stat.max_time_ms, 2500.0);
        assert!((stat.total_time_ms - 4460.0).abs() < 1e-6);
        assert!((stat.avg_time_ms - 892.0).abs() < 1e-6);
        assert_eq!(stat.slow_count, 2);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let inst = QueryInstrumentation::new(ms(1000));
        inst.record("streams.current", ms(1000));
        inst.record("streams.current", ms(1001));
        assert_eq!(inst.stat("streams.current").unwrap().slow_count, 1);
    }

    #[test]
    fn test_stats_are_detached_copies() {
        let inst = QueryInstrumentation::default();
        inst.record("users.list", ms(10));

        let mut snapshot = inst.stats();
        snapshot.get_mut("users.list").unwrap().count = 999;
        snapshot.clear();

        assert_eq!(inst.stat("users.list").unwrap().count, 1);
        assert_eq!(inst.stats().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_times_success_and_failure() {
        let inst = QueryInstrumentation::default();

        let ok: Result<u32, String> = inst
            .measure("ads.active", || async {
                tokio::time::sleep(ms(250)).await;
                Ok(3)
            })
            .await;
        assert_eq!(ok, Ok(3));

        let err: Result<u32, String> = inst
            .measure("ads.active", || async {
                tokio::time::sleep(ms(1750)).await;
                Err("connection reset".to_string())
            })
            .await;
        assert_eq!(err, Err("connection reset".to_string()));

        // Paused clock: elapsed time is the slept time, give or take a tick.
        let stat = inst.stat("ads.active").unwrap();
        assert_eq!(stat.count, 2);
        assert!((stat.min_time_ms - 250.0).abs() < 2.0);
        assert!((stat.max_time_ms - 1750.0).abs() < 2.0);
        assert!((stat.avg_time_ms - 1000.0).abs() < 2.0);
        assert_eq!(stat.slow_count, 1);
    }

    #[test]
    fn test_measure_returns_output_untouched() {
        use tokio_test::block_on;

        let inst = QueryInstrumentation::default();
        let dj = block_on(inst.measure("users.get", || async { Some("night-shift") }));
        assert_eq!(dj, Some("night-shift"));
        assert_eq!(inst.stat("users.get").unwrap().count, 1);
    }

    #[test]
    fn test_measure_sync() {
        let inst = QueryInstrumentation::default();
        let value = inst.measure_sync("config.parse", || 40 + 2);
        assert_eq!(value, 42);
        assert_eq!(inst.stat("config.parse").unwrap().count, 1);
    }

    #[test]
    fn test_aggregate_avg_is_call_weighted() {
        let inst = QueryInstrumentation::default();
        assert_eq!(inst.aggregate_avg_ms(), None);

        inst.record("fast", ms(100));
        inst.record("fast", ms(100));
        inst.record("fast", ms(100));
        inst.record("slow", ms(2900));

        assert_eq!(inst.total_calls(), 4);
        assert!((inst.aggregate_avg_ms().unwrap() - 800.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset() {
        let inst = QueryInstrumentation::default();
        inst.record("fast", ms(1));
        inst.reset();
        assert!(inst.stats().is_empty());
        assert_eq!(inst.aggregate_avg_ms(), None);
    }

    #[test]
    fn test_serialization() {
        let inst = QueryInstrumentation::default();
        inst.record("ads.active", ms(12));
        let json = serde_json::to_value(inst.stat("ads.active").unwrap()).unwrap();

        assert_eq!(json["name"], "ads.active");
        assert_eq!(json["count"], 1);
        assert_eq!(json["avgTimeMs"], 12.0);
        assert_eq!(json["slowCount"], 0);
    }
}
