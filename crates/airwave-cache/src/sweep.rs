//! Background TTL sweep for the local tier.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::local::LocalStore;
use crate::metrics::{self, TIER_LOCAL};

/// Spawn a task that purges expired local entries every `every`.
///
/// Reads already skip expired entries; the sweep only bounds how long
/// unread stale entries hold memory.
pub fn spawn_sweeper(store: Arc<LocalStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = store.purge_expired();
            let remaining = store.len();
            if removed > 0 {
                tracing::debug!(removed, remaining, "swept expired local cache entries");
            }
            metrics::set_cache_entries(TIER_LOCAL, remaining);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_unread_entries() {
        let store = Arc::new(LocalStore::new(10));
        store.set("ads:active", Arc::new(vec![1, 2, 3]), Duration::from_secs(5));
        store.set("streams:main", Arc::new(vec![4]), Duration::from_secs(600));

        let handle = spawn_sweeper(Arc::clone(&store), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().expirations, 1);
        handle.abort();
    }
}
