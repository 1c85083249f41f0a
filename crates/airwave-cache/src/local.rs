//! Process-local (L1) cache tier.
//!
//! A bounded map from key to `(payload, expiry)`. Entries are kept in
//! insertion order; once the entry count exceeds the configured ceiling the
//! oldest insertions are dropped first. Expired entries are removed lazily on
//! read and eagerly by [`LocalStore::purge_expired`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Default maximum number of entries held by the local tier.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Longest lifetime any cached entry gets; longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A cached payload with its absolute expiry.
///
/// The payload is wrapped in `Arc` so hits hand out a pointer instead of
/// copying the encoded value.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub data: Arc<Vec<u8>>,
    pub expires_at: Instant,
}

impl CacheEntry {
    /// TTLs beyond [`MAX_TTL`] are clamped so the expiry never overflows.
    pub fn new(data: Arc<Vec<u8>>, ttl: Duration) -> Self {
        let now = Instant::now();
        let ttl = ttl.min(MAX_TTL);
        Self {
            data,
            expires_at: now.checked_add(ttl).unwrap_or(now),
        }
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Local tier statistics.
#[derive(Debug, Clone, Default)]
pub struct LocalStoreStats {
    /// Number of entries currently held (expired ones included until swept).
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because the ceiling was exceeded.
    pub evictions: u64,
    /// Entries dropped because their TTL passed.
    pub expirations: u64,
}

impl LocalStoreStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Bounded in-memory cache tier.
pub struct LocalStore {
    entries: Mutex<IndexMap<String, CacheEntry>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LocalStore {
    /// Create a store holding at most `max_entries` entries (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get a live payload. Expired entries behave as a miss and are removed.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let lookup = entries.get(key).map(|entry| {
            if entry.is_expired_at(now) {
                None
            } else {
                Some(Arc::clone(&entry.data))
            }
        });

        match lookup {
            Some(Some(data)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            Some(None) => {
                entries.shift_remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite a payload expiring `ttl` from now.
    ///
    /// An overwrite counts as a fresh insertion for eviction order. A zero
    /// TTL stores nothing.
    pub fn set(&self, key: &str, data: Arc<Vec<u8>>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let entry = CacheEntry::new(data, ttl);
        let mut entries = self.entries.lock();
        entries.shift_remove(key);
        entries.insert(key.to_string(), entry);

        let excess = entries.len().saturating_sub(self.max_entries);
        if excess > 0 {
            let evicted = entries.drain(..excess).count();
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(
                evicted,
                max_entries = self.max_entries,
                "local cache over capacity, evicted oldest entries"
            );
        }
    }

    /// Remove one entry. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().shift_remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - entries.len();

        if removed > 0 {
            self.expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> LocalStoreStats {
        LocalStoreStats {
            entries: self.len(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
