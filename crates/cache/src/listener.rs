//! Background task that clears the cache layer when the remote record set
//! changes.

use crate::layer::CacheLayer;
use campaign_core::event_bus::{SyncBus, SyncEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Subscribe to `bus` and invalidate `layer` on every `DataSyncComplete`.
/// Announces the dropped keys with `CacheInvalidated`. The task holds only a
/// weak bus handle and ends once the caller drops every `SyncBus` clone.
pub fn spawn_invalidation_listener(layer: Arc<CacheLayer>, bus: &SyncBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let bus = bus.downgrade();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SyncEvent::DataSyncComplete { account_id, .. }) => {
                    let keys = layer.invalidate_all().await;
                    info!(
                        account_id = account_id.as_deref().unwrap_or("*"),
                        keys = keys.len(),
                        "Data sync complete, cache invalidated"
                    );
                    if let Some(bus) = bus.upgrade() {
                        bus.publish(SyncEvent::cache_invalidated(keys));
                    }
                }
                Ok(SyncEvent::CacheInvalidated { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // A missed sync event could leave stale data behind.
                    warn!(skipped = skipped, "Sync listener lagged, invalidating cache");
                    layer.invalidate_all().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Sync bus closed, invalidation listener stopped");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::layer::keys;
    use chrono::Duration;

    #[tokio::test]
    async fn test_sync_event_clears_cache() {
        let layer = Arc::new(CacheLayer::in_memory(Duration::hours(24)));
        layer.set(keys::RECORDS, &vec![1, 2]).await.unwrap();
        layer.set(keys::ACCOUNTS, &vec!["a"]).await.unwrap();

        let bus = SyncBus::new();
        let mut observer = bus.subscribe();
        let _task = spawn_invalidation_listener(layer.clone(), &bus);

        bus.publish(SyncEvent::data_sync_complete(None));

        // First the sync event itself, then the listener's announcement.
        assert!(matches!(
            observer.recv().await.unwrap(),
            SyncEvent::DataSyncComplete { .. }
        ));
        match observer.recv().await.unwrap() {
            SyncEvent::CacheInvalidated { mut keys, .. } => {
                keys.sort();
                assert_eq!(keys, vec!["accounts_cache", "records_cache"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!layer.is_valid(keys::RECORDS).await);
        assert!(!layer.is_valid(keys::ACCOUNTS).await);
    }

    #[tokio::test]
    async fn test_listener_stops_when_bus_dropped() {
        let layer = Arc::new(CacheLayer::in_memory(Duration::hours(24)));
        let bus = SyncBus::new();
        let task = spawn_invalidation_listener(layer, &bus);

        drop(bus);
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
