//! Two-tier get-or-compute facade.
//!
//! ## Lookup Order
//!
//! ```text
//! get_or_compute → L2 (Redis) → L1 (local) → producer
//!                      ↓             ↓            ↓
//!              write-through L1   return    write L1 + L2
//! ```
//!
//! The shared tier is consulted first because it is authoritative across
//! instances. The local tier answers when the shared tier misses or is
//! unavailable, so it may serve a value another instance has already
//! replaced until its TTL runs out.
//!
//! Concurrent misses on the same key each run the producer; there is no
//! single-flight coalescing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::local::{LocalStore, LocalStoreStats, MAX_TTL};
use crate::metrics::{self, TIER_LOCAL, TIER_REMOTE};
use crate::pubsub::InvalidationMessage;
use crate::remote::RemoteStore;

/// Whether and for how long a computed value is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Cache in both tiers for this long. A zero duration caches nothing.
    Ttl(Duration),
    /// Bypass the cache entirely (write paths).
    NoCache,
}

impl CachePolicy {
    /// Map a signed TTL in seconds; zero or negative means no caching.
    pub fn from_secs(secs: i64) -> Self {
        if secs <= 0 {
            Self::NoCache
        } else {
            Self::Ttl(Duration::from_secs(secs as u64))
        }
    }

    /// The effective TTL clamped to [`MAX_TTL`], or `None` when nothing
    /// should be cached.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Ttl(ttl) if !ttl.is_zero() => Some((*ttl).min(MAX_TTL)),
            _ => None,
        }
    }
}

impl From<Duration> for CachePolicy {
    fn from(ttl: Duration) -> Self {
        Self::Ttl(ttl)
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub mode: &'static str,
    pub local: LocalStoreStats,
}

/// Local tier plus an optional shared tier behind one call surface.
///
/// Cheap to clone; clones share both tiers.
#[derive(Clone)]
pub struct TieredCache {
    local: Arc<LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl TieredCache {
    /// Single-instance mode: local tier only.
    pub fn local_only(local: Arc<LocalStore>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    /// Multi-instance mode: shared tier in front of the local tier.
    pub fn with_remote(local: Arc<LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            local,
            remote: Some(remote),
        }
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Return the cached value for `key`, or run `producer` and cache its result.
    ///
    /// Producer errors are returned unchanged and nothing is cached. Failures
    /// inside either tier only cost a miss. With [`CachePolicy::NoCache`] (or
    /// a zero TTL) neither tier is read or written.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        policy: impl Into<CachePolicy>,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(ttl) = policy.into().ttl() else {
            return producer().await;
        };

        if let Some(value) = self.lookup::<T>(key, Some(ttl)).await {
            return Ok(value);
        }

        let value = producer().await?;
        self.set(key, &value, CachePolicy::Ttl(ttl)).await;
        Ok(value)
    }

    /// Read `key` without computing anything on a miss.
    ///
    /// Same lookup order as [`get_or_compute`](Self::get_or_compute), except
    /// a shared-tier hit is not copied into the local tier: the remaining
    /// TTL is unknown here.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key, None).await
    }

    /// Encode `value` and write it to both tiers. Returns whether the shared
    /// tier (when configured) acknowledged the write.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, policy: CachePolicy) -> bool {
        let Some(ttl) = policy.ttl() else {
            return true;
        };

        let data = match rmp_serde::to_vec_named(value) {
            Ok(data) => Arc::new(data),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode value for cache");
                return false;
            }
        };

        self.local.set(key, Arc::clone(&data), ttl);

        match &self.remote {
            Some(remote) => match remote.set(key, &data, ttl).await {
                Ok(()) => {
                    tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set (L1+L2)");
                    true
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Redis SET error");
                    metrics::record_remote_error("set");
                    false
                }
            },
            None => true,
        }
    }

    /// Remove `key` from both tiers and notify other instances.
    ///
    /// Returns `false` when the shared tier could not be reached; the local
    /// tier is always cleared.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.local.delete(key);

        let Some(remote) = &self.remote else {
            tracing::debug!(key = %key, "cache invalidated (local)");
            return true;
        };

        let deleted = match remote.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Redis DEL error, invalidation is partial");
                metrics::record_remote_error("delete");
                false
            }
        };

        self.broadcast(remote.as_ref(), InvalidationMessage::Key(key.to_string()))
            .await;
        deleted
    }

    /// Remove every key starting with `prefix` from both tiers.
    ///
    /// The shared tier is scanned for matching keys; the prefix is matched
    /// literally, never as a pattern.
    pub async fn invalidate_prefix(&self, prefix: &str) -> bool {
        let removed_local = self.local.remove_prefix(prefix);

        let Some(remote) = &self.remote else {
            tracing::debug!(prefix = %prefix, removed_local, "cache prefix invalidated (local)");
            return true;
        };

        let deleted = match remote.delete_prefix(prefix).await {
            Ok(removed_remote) => {
                tracing::debug!(
                    prefix = %prefix,
                    removed_local,
                    removed_remote,
                    "cache prefix invalidated (L1+L2)"
                );
                true
            }
            Err(e) => {
                tracing::warn!(prefix = %prefix, error = %e, "Redis prefix delete error, invalidation is partial");
                metrics::record_remote_error("delete_prefix");
                false
            }
        };

        self.broadcast(remote.as_ref(), InvalidationMessage::Prefix(prefix.to_string()))
            .await;
        deleted
    }

    /// Clear both tiers.
    pub async fn invalidate_all(&self) -> bool {
        self.local.clear();

        let Some(remote) = &self.remote else {
            tracing::debug!("cache cleared (local)");
            return true;
        };

        let cleared = match remote.clear().await {
            Ok(removed) => {
                tracing::info!(removed_remote = removed, "cache cleared (L1+L2)");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis clear error, only the local tier was cleared");
                metrics::record_remote_error("clear");
                false
            }
        };

        self.broadcast(remote.as_ref(), InvalidationMessage::All).await;
        cleared
    }

    /// Check if the shared tier answers (for health checks).
    pub async fn is_remote_available(&self) -> bool {
        match &self.remote {
            Some(remote) => remote.ping().await.is_ok(),
            None => false,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let local = self.local.stats();
        metrics::set_cache_entries(TIER_LOCAL, local.entries);
        CacheStats {
            mode: if self.remote.is_some() { "tiered" } else { "local" },
            local,
        }
    }

    /// Decode the cached payload for `key`. Undecodable payloads are dropped.
    async fn lookup<T: DeserializeOwned>(
        &self,
        key: &str,
        write_through: Option<Duration>,
    ) -> Option<T> {
        let data = self.read(key, write_through).await?;
        match rmp_serde::from_slice::<T>(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to decode cached value");
                self.invalidate(key).await;
                None
            }
        }
    }

    async fn read(&self, key: &str, write_through: Option<Duration>) -> Option<Arc<Vec<u8>>> {
        // 1. Shared tier; a hit is written through to the local tier
        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(data)) => {
                    tracing::debug!(key = %key, "cache hit (L2)");
                    metrics::record_cache_hit(TIER_REMOTE);
                    let data = Arc::new(data);
                    if let Some(ttl) = write_through {
                        self.local.set(key, Arc::clone(&data), ttl);
                    }
                    return Some(data);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Redis GET error, falling back to local tier");
                    metrics::record_remote_error("get");
                }
            }
        }

        // 2. Local tier
        if let Some(data) = self.local.get(key) {
            tracing::debug!(key = %key, "cache hit (L1)");
            metrics::record_cache_hit(TIER_LOCAL);
            return Some(data);
        }

        tracing::debug!(key = %key, "cache miss");
        metrics::record_cache_miss();
        None
    }

    async fn broadcast(&self, remote: &dyn RemoteStore, message: InvalidationMessage) {
        if let Err(e) = remote.publish(&message).await {
            tracing::warn!(?message, error = %e, "Redis PUBLISH error");
            metrics::record_remote_error("publish");
        }
    }
}
