//! Cross-node cache invalidation bridge.
//!
//! Mutations publish `(name, type)` through the `CacheInvalidator`; the
//! bridge subscribes to the same feed and evicts the matching L1 entry, so
//! every node converges regardless of which one applied the change.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::dns::enums::RecordType;
use crate::error::Result;
use crate::traits::CacheInvalidator;

pub fn invalidation_key(name: &str, rtype: RecordType) -> String {
    format!(
        "{}:{}",
        name.trim_end_matches('.').to_lowercase(),
        u16::from(rtype)
    )
}

pub struct InvalidationBridge {
    cache: Arc<ResponseCache>,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl InvalidationBridge {
    pub fn new(cache: Arc<ResponseCache>, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        Self { cache, invalidator }
    }

    /// Consume the invalidation feed until shutdown. A lost subscription is
    /// retried; losing a signal only means serving a stale entry until its
    /// TTL runs out.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let mut feed = match self.invalidator.subscribe().await {
                Ok(feed) => feed,
                Err(e) => {
                    warn!(error = %e, "invalidation subscribe failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => continue,
                        _ = shutdown.recv() => return,
                    }
                }
            };

            loop {
                tokio::select! {
                    signal = feed.recv() => match signal {
                        Some((name, rtype)) => {
                            let key = invalidation_key(&name, rtype);
                            debug!(key, "cache invalidation");
                            self.cache.remove(&key);
                            // ANY answers at the name are also stale now.
                            self.cache.remove(&invalidation_key(&name, RecordType::ANY));
                        }
                        None => break,
                    },
                    _ = shutdown.recv() => return,
                }
            }
        }
    }
}

/// Process-local invalidator for tests and standalone runs: a broadcast
/// channel standing in for the external pub/sub transport.
pub struct MemoryInvalidator {
    tx: broadcast::Sender<(String, RecordType)>,
}

impl MemoryInvalidator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }
}

impl Default for MemoryInvalidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheInvalidator for MemoryInvalidator {
    async fn publish(&self, name: &str, rtype: RecordType) -> Result<()> {
        // No subscribers is fine; the signal simply has no audience yet.
        let _ = self.tx.send((name.to_string(), rtype));
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<(String, RecordType)>> {
        let mut rx = self.tx.subscribe();
        let (tx, out) = mpsc::channel(1024);
        tokio::spawn(async move {
            while let Ok(signal) = rx.recv().await {
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn bridge_evicts_published_keys() {
        let cache = Arc::new(ResponseCache::new());
        let invalidator = Arc::new(MemoryInvalidator::new());
        let bridge = InvalidationBridge::new(Arc::clone(&cache), invalidator.clone());

        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();
        let handle = tokio::spawn(async move { bridge.run(shutdown_rx).await });

        // Let the bridge subscribe before publishing.
        tokio::time::sleep(Duration::from_millis(20)).await;

        cache.set("www.example.com:1", vec![0, 0, 1], Duration::from_secs(60));
        invalidator
            .publish("www.example.com.", RecordType::A)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get("www.example.com:1", 7).is_none());

        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn memory_invalidator_fans_out() {
        let invalidator = MemoryInvalidator::new();
        let mut a = invalidator.subscribe().await.unwrap();
        let mut b = invalidator.subscribe().await.unwrap();
        invalidator.publish("x.example.com", RecordType::TXT).await.unwrap();
        let got_a = tokio::time::timeout(Duration::from_secs(1), a.recv()).await.unwrap();
        let got_b = tokio::time::timeout(Duration::from_secs(1), b.recv()).await.unwrap();
        assert_eq!(got_a, Some(("x.example.com".to_string(), RecordType::TXT)));
        assert_eq!(got_a, got_b);
    }
}
