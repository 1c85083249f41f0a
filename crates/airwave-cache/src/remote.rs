//! Shared (L2) cache tier backed by Redis.
//!
//! Every operation returns `Result<_, RemoteError>`; an `Err` means the tier
//! is unavailable and callers decide whether to log and continue. Nothing in
//! this module retries: the pool owns reconnection.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use thiserror::Error;

use crate::config::RedisConfig;
use crate::local::MAX_TTL;
use crate::pubsub::{INVALIDATION_CHANNEL, InvalidationMessage};

/// Keys scanned per `SCAN` round trip during prefix deletes.
const SCAN_BATCH: usize = 500;

/// Failure talking to the shared tier.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to create Redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("failed to get Redis connection: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Redis operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode invalidation message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("remote store unavailable: {0}")]
    Unavailable(String),
}

/// Request/response key-value store used as the shared cache tier.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `Ok(None)` is a miss; `Err` means the store could not be asked.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError>;

    async fn delete(&self, key: &str) -> Result<(), RemoteError>;

    /// Delete every key starting with `prefix`. Returns the number deleted.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, RemoteError>;

    /// Delete every key owned by this store. Returns the number deleted.
    async fn clear(&self) -> Result<u64, RemoteError>;

    async fn ping(&self) -> Result<(), RemoteError>;

    /// Broadcast an invalidation to other instances.
    ///
    /// Stores without a broadcast channel accept and drop the message.
    async fn publish(&self, _message: &InvalidationMessage) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Redis implementation of [`RemoteStore`].
///
/// Keys are namespaced with a fixed prefix so `clear` only touches keys this
/// cache wrote. Every command is bounded by `timeout`.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    namespace: String,
    timeout: Duration,
}

impl RedisStore {
    pub fn new(pool: Pool, namespace: impl Into<String>, timeout: Duration) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            timeout,
        }
    }

    /// Build the connection pool described by `config`.
    ///
    /// No connection is opened here; call [`RemoteStore::ping`] to verify.
    pub fn from_config(config: &RedisConfig) -> Result<Self, RemoteError> {
        let timeout = config.timeout();
        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let pool_config = redis_config
            .pool
            .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let pool = redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
        Ok(Self::new(pool, config.key_prefix.clone(), timeout))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    async fn connection(&self) -> Result<Connection, RemoteError> {
        Ok(self.pool.get().await?)
    }

    /// Run `op` under the store's timeout, folding a timeout into `RemoteError`.
    async fn bounded<T, F>(&self, op: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| RemoteError::Timeout(self.timeout))?
    }

    /// SCAN for `pattern` and DEL the matches in batches.
    async fn scan_delete(&self, pattern: String) -> Result<u64, RemoteError> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(deleted)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let key = self.namespaced(key);
        self.bounded(async {
            let mut conn = self.connection().await?;
            let data: Option<Vec<u8>> = conn.get(&key).await?;
            Ok(data)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError> {
        let key = self.namespaced(key);
        let ttl_ms = expiry_millis(ttl);
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.pset_ex::<_, _, ()>(&key, value, ttl_ms).await?;
            tracing::debug!(key = %key, ttl_ms, "cache set (L2)");
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        let key = self.namespaced(key);
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.del::<_, ()>(&key).await?;
            Ok(())
        })
        .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, RemoteError> {
        let pattern = format!("{}*", escape_glob(&self.namespaced(prefix)));
        self.bounded(self.scan_delete(pattern)).await
    }

    async fn clear(&self) -> Result<u64, RemoteError> {
        let pattern = format!("{}*", escape_glob(&self.namespace));
        self.bounded(self.scan_delete(pattern)).await
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn publish(&self, message: &InvalidationMessage) -> Result<(), RemoteError> {
        let payload = message.to_payload()?;
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.publish::<_, _, ()>(INVALIDATION_CHANNEL, &payload)
                .await?;
            tracing::debug!(payload = %payload, "published cache invalidation");
            Ok(())
        })
        .await
    }
}

/// PSETEX expiry for `ttl`: whole milliseconds rounded up, at least 1 and
/// at most [`MAX_TTL`], so the shared tier never outlives the local one.
fn expiry_millis(ttl: Duration) -> u64 {
    let ms = ttl.min(MAX_TTL).as_nanos().div_ceil(1_000_000);
    u64::try_from(ms).unwrap_or(u64::MAX).max(1)
}

/// Escape Redis glob metacharacters so a literal prefix matches literally.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
