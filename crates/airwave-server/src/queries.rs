//! Instrumented, cached data access for route handlers.
//!
//! Every read goes through [`QueryLayer::fetch`], which times the whole
//! cache-or-produce call under the operation name. Writes go through
//! [`QueryLayer::mutate`], which is timed but never cached, and drop the
//! cache entries they make stale once they succeed.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use airwave_cache::{CacheConfig, CachePolicy, TieredCache};
use airwave_monitor::QueryInstrumentation;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Cache key convention for one entity type.
///
/// Keys look like `ads:42` for a single item and `ads:all` for the full
/// listing; `ads:*` names every key of the entity when invalidating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKey {
    entity: &'static str,
}

impl ResourceKey {
    pub const fn new(entity: &'static str) -> Self {
        Self { entity }
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn item(&self, id: impl Display) -> String {
        format!("{}:{}", self.entity, id)
    }

    pub fn all(&self) -> String {
        format!("{}:all", self.entity)
    }

    /// Invalidation pattern covering every key of this entity.
    pub fn every(&self) -> String {
        format!("{}:*", self.entity)
    }
}

/// Cache facade and instrumentation composed for callers.
///
/// Cheap to clone; clones share the cache and the aggregates.
#[derive(Clone)]
pub struct QueryLayer {
    cache: TieredCache,
    instrumentation: Arc<QueryInstrumentation>,
    ttls: Arc<CacheConfig>,
}

impl QueryLayer {
    pub fn new(
        cache: TieredCache,
        instrumentation: Arc<QueryInstrumentation>,
        ttls: CacheConfig,
    ) -> Self {
        Self {
            cache,
            instrumentation,
            ttls: Arc::new(ttls),
        }
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn instrumentation(&self) -> &Arc<QueryInstrumentation> {
        &self.instrumentation
    }

    /// Configured caching policy for an entity type.
    pub fn policy_for(&self, resource: &ResourceKey) -> CachePolicy {
        CachePolicy::Ttl(self.ttls.ttl_for(resource.entity()))
    }

    /// Timed get-or-compute. Producer errors come back unchanged.
    pub async fn fetch<T, E, F, Fut>(
        &self,
        name: &str,
        key: &str,
        policy: impl Into<CachePolicy>,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.instrumentation
            .measure(name, || self.cache.get_or_compute(key, policy, producer))
            .await
    }

    /// Timed write. On success each entry of `invalidate` is dropped from the
    /// cache: a plain key exactly, `prefix*` by prefix, and `*` clears it.
    ///
    /// Failed invalidations are logged by the cache and do not fail the write.
    pub async fn mutate<T, E, F, Fut>(&self, name: &str, invalidate: &[&str], op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = self.instrumentation.measure(name, op).await?;

        for target in invalidate {
            match target.strip_suffix('*') {
                Some("") => {
                    self.cache.invalidate_all().await;
                }
                Some(prefix) => {
                    self.cache.invalidate_prefix(prefix).await;
                }
                None => {
                    self.cache.invalidate(target).await;
                }
            }
        }

        Ok(value)
    }
}
