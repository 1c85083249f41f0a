//! Redis Pub/Sub for cross-instance invalidation of the local tier.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::local::LocalStore;

/// Channel carrying [`InvalidationMessage`] payloads.
pub const INVALIDATION_CHANNEL: &str = "airwave:cache:invalidate";

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// An invalidation broadcast by one instance and applied by all others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "target", rename_all = "lowercase")]
pub enum InvalidationMessage {
    Key(String),
    Prefix(String),
    All,
}

impl InvalidationMessage {
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Apply this invalidation to a local tier. Returns the number of entries removed.
    pub fn apply(&self, local: &LocalStore) -> usize {
        match self {
            Self::Key(key) => usize::from(local.delete(key)),
            Self::Prefix(prefix) => local.remove_prefix(prefix),
            Self::All => {
                let removed = local.len();
                local.clear();
                removed
            }
        }
    }
}

/// Subscribes to [`INVALIDATION_CHANNEL`] and keeps the local tier in step
/// with invalidations issued by other instances.
///
/// ```text
/// Instance 1: cache.invalidate("ads:active")
///   ↓
/// Redis Pub/Sub: PUBLISH airwave:cache:invalidate {"scope":"key","target":"ads:active"}
///   ↓
/// Instance 2: listener removes "ads:active" from its local tier
/// ```
pub struct InvalidationListener {
    pub redis_url: String,
    pub local: Arc<LocalStore>,
}

impl InvalidationListener {
    /// Spawn the listener. It reconnects with exponential backoff when the
    /// subscription drops.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);

            loop {
                match self.run().await {
                    Ok(()) => {
                        backoff = Duration::from_secs(1);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Cache invalidation listener error, reconnecting..."
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self) -> Result<(), String> {
        use futures_util::StreamExt;

        let client = redis::Client::open(self.redis_url.clone())
            .map_err(|e| format!("failed to create Redis client: {e}"))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

        pubsub
            .subscribe(INVALIDATION_CHANNEL)
            .await
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        tracing::info!(channel = INVALIDATION_CHANNEL, "Subscribed to cache invalidations");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload = match msg.get_payload::<String>() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read invalidation payload");
                    continue;
                }
            };

            match InvalidationMessage::from_payload(&payload) {
                Ok(message) => {
                    let removed = message.apply(&self.local);
                    tracing::debug!(?message, removed, "applied remote cache invalidation");
                }
                Err(e) => {
                    tracing::warn!(payload = %payload, error = %e, "malformed invalidation message");
                }
            }
        }

        Err("pub/sub connection closed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_format() {
        let msg = InvalidationMessage::Key("ads:active".to_string());
        let payload = msg.to_payload().unwrap();
        assert_eq!(payload, r#"{"scope":"key","target":"ads:active"}"#);
        assert_eq!(InvalidationMessage::from_payload(&payload).unwrap(), msg);

        let all = InvalidationMessage::All.to_payload().unwrap();
        assert_eq!(all, r#"{"scope":"all"}"#);
        assert_eq!(
            InvalidationMessage::from_payload(&all).unwrap(),
            InvalidationMessage::All
        );
    }

    #[test]
    fn test_apply_to_local_tier() {
        let local = LocalStore::new(10);
        let ttl = Duration::from_secs(60);
        local.set("ads:1", Arc::new(vec![1]), ttl);
        local.set("ads:2", Arc::new(vec![2]), ttl);
        local.set("streams:main", Arc::new(vec![3]), ttl);

        assert_eq!(InvalidationMessage::Key("ads:1".into()).apply(&local), 1);
        assert_eq!(InvalidationMessage::Key("ads:1".into()).apply(&local), 0);
        assert_eq!(InvalidationMessage::Prefix("ads:".into()).apply(&local), 1);
        assert_eq!(InvalidationMessage::All.apply(&local), 1);
        assert!(local.is_empty());
    }
}
