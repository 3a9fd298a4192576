//! Sync event bus: explicit publish/subscribe channel for "the remote record
//! set changed" notifications.
//!
//! Consumers (the cache invalidation listener, views holding aggregates)
//! subscribe and recompute from a fresh fetch when they see
//! `DataSyncComplete`. Events carry no record data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The remote record set changed, e.g. after a manual resync.
    DataSyncComplete {
        event_id: Uuid,
        account_id: Option<String>,
        completed_at: DateTime<Utc>,
    },
    /// Cache entries were dropped in response to a sync.
    CacheInvalidated { event_id: Uuid, keys: Vec<String> },
}

impl SyncEvent {
    pub fn data_sync_complete(account_id: Option<String>) -> Self {
        Self::DataSyncComplete {
            event_id: Uuid::new_v4(),
            account_id,
            completed_at: Utc::now(),
        }
    }

    pub fn cache_invalidated(keys: Vec<String>) -> Self {
        Self::CacheInvalidated {
            event_id: Uuid::new_v4(),
            keys,
        }
    }
}

/// Cloneable handle to a broadcast channel of [`SyncEvent`]s.
#[derive(Clone)]
pub struct SyncBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl SyncBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers. Returns how many received it;
    /// publishing with no subscribers is not an error.
    pub fn publish(&self, event: SyncEvent) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(_) => {
                debug!("Sync event published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Handle for background tasks: it can publish while any owning handle
    /// is alive, but does not keep the channel open on its own.
    pub fn downgrade(&self) -> WeakSyncBus {
        WeakSyncBus {
            sender: self.sender.downgrade(),
        }
    }
}

#[derive(Clone)]
pub struct WeakSyncBus {
    sender: broadcast::WeakSender<SyncEvent>,
}

impl WeakSyncBus {
    /// `None` once every [`SyncBus`] handle has been dropped.
    pub fn upgrade(&self) -> Option<SyncBus> {
        self.sender.upgrade().map(|sender| SyncBus { sender })
    }
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new()
    }
}
