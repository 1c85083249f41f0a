use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::local::MAX_TTL;

/// Redis configuration for the shared cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (local tier only)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Namespace prepended to every key written to Redis
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

fn default_redis_key_prefix() -> String {
    "airwave:".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Local (L1) cache max entries; oldest insertions are evicted beyond this
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// TTL used for resources without an explicit entry in `resource_ttls`
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Interval of the eager expiry sweep over the local tier (0 disables it)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Per-resource TTL overrides in seconds, e.g. `ads = 60`
    #[serde(default)]
    pub resource_ttls: HashMap<String, u64>,
}

fn default_local_max_entries() -> usize {
    1000
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_max_entries: default_local_max_entries(),
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            resource_ttls: HashMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.local_max_entries == 0 {
            return Err("cache.local_max_entries must be > 0".into());
        }
        let max = MAX_TTL.as_secs();
        if self.default_ttl_secs > max {
            return Err(format!("cache.default_ttl_secs must be <= {max}"));
        }
        if let Some((resource, _)) = self.resource_ttls.iter().find(|(_, secs)| **secs > max) {
            return Err(format!("cache.resource_ttls.{resource} must be <= {max}"));
        }
        Ok(())
    }

    /// TTL for a logical resource type, falling back to `default_ttl_secs`.
    pub fn ttl_for(&self, resource: &str) -> Duration {
        let secs = self
            .resource_ttls
            .get(resource)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}
