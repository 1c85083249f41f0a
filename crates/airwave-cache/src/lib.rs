//! Two-tier query result cache.
//!
//! ## Architecture
//!
//! - **L1 ([`LocalStore`])**: In-memory, bounded, per-instance
//! - **L2 ([`RedisStore`])**: Network, shared across instances, optional
//! - **Pub/Sub**: Cross-instance invalidation of L1
//!
//! [`TieredCache`] is the single entry point. Construct it once at start-up
//! (see [`create_cache`]) and hand clones to every data-access caller.
//!
//! ## Graceful Degradation
//!
//! Caching fails open. If Redis is disabled, unreachable, or starts failing
//! mid-flight, reads fall through to L1 and then to the producer; only the
//! producer's own errors ever reach the caller.

pub mod config;
pub mod local;
pub mod metrics;
pub mod pubsub;
pub mod remote;
pub mod sweep;
pub mod tiered;

use std::sync::Arc;

use tokio::task::JoinHandle;

pub use config::{CacheConfig, RedisConfig};
pub use local::{CacheEntry, LocalStore, LocalStoreStats, MAX_TTL};
pub use pubsub::{INVALIDATION_CHANNEL, InvalidationListener, InvalidationMessage};
pub use remote::{RedisStore, RemoteError, RemoteStore};
pub use sweep::spawn_sweeper;
pub use tiered::{CachePolicy, CacheStats, TieredCache};

/// The cache built by [`create_cache`] plus the background task it started.
pub struct CacheRuntime {
    pub cache: TieredCache,
    /// Pub/Sub invalidation listener; `None` when Redis is disabled.
    pub listener: Option<JoinHandle<()>>,
}

/// Create the process-wide cache from configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: local tier only
/// - **Redis enabled**: local tier plus Redis. Only an invalid pool
///   configuration falls back to local-only. An unreachable server at
///   start-up is logged and tolerated: each call fails open until the pool
///   reconnects, and the invalidation listener retries with backoff.
pub async fn create_cache(cache: &CacheConfig, redis: &RedisConfig) -> CacheRuntime {
    let local = Arc::new(LocalStore::new(cache.local_max_entries));

    if !redis.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return CacheRuntime {
            cache: TieredCache::local_only(local),
            listener: None,
        };
    }

    tracing::info!(url = %redis.url, "Connecting to Redis");

    let store = match RedisStore::from_config(redis) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return CacheRuntime {
                cache: TieredCache::local_only(local),
                listener: None,
            };
        }
    };

    match store.ping().await {
        Ok(()) => tracing::info!("Connected to Redis"),
        Err(e) => tracing::warn!(
            error = %e,
            "Redis not reachable yet, serving from the local tier until it answers"
        ),
    }

    let listener = InvalidationListener {
        redis_url: redis.url.clone(),
        local: Arc::clone(&local),
    }
    .start();

    CacheRuntime {
        cache: TieredCache::with_remote(local, Arc::new(store)),
        listener: Some(listener),
    }
}
