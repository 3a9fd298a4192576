#![warn(clippy::unwrap_used)]

//! Staleness-aware cache in front of the remote record source.
//! Backends: in-process DashMap, JSON files on disk, or Redis.

pub mod client;
pub mod file;
pub mod layer;
pub mod listener;
pub mod local;
pub mod store;

pub use client::RedisStore;
pub use file::FileStore;
pub use layer::{keys, CacheEntry, CacheLayer, Clock, ManualClock, SystemClock};
pub use listener::spawn_invalidation_listener;
pub use local::MemoryStore;
pub use store::{CacheError, CacheStore};

use campaign_core::config::{CacheBackend, CacheConfig};
use chrono::Duration;
use std::sync::Arc;
use tracing::info;

/// Build a cache layer for the configured backend.
pub async fn open_layer(config: &CacheConfig) -> Result<CacheLayer, CacheError> {
    let store: Arc<dyn CacheStore> = match config.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::default()),
        CacheBackend::File => Arc::new(FileStore::open(&config.dir).await?),
        CacheBackend::Redis => Arc::new(RedisStore::connect(&config.redis_url).await?),
    };
    let ttl_secs = i64::try_from(config.ttl_secs)
        .unwrap_or(i64::MAX)
        .min(i64::MAX / 1_000);
    info!(backend = ?config.backend, ttl_secs = ttl_secs, "Cache layer ready");
    Ok(CacheLayer::new(store, Duration::seconds(ttl_secs)))
}
