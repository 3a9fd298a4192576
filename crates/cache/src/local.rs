//! In-process store backed by DashMap for lock-free concurrent access.
//! Used for tests and as the default backend.

use crate::store::{CacheError, CacheStore};
use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use std::sync::Arc;

/// Lock-free in-memory store of encoded cache entries.
#[derive(Clone)]
pub struct MemoryStore {
    store: Arc<DashMap<String, String>>,
    max_entries: usize,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(DashMap::with_capacity(max_entries.min(1024))),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Write raw bytes without going through the layer (tests use this to
    /// plant corrupt entries).
    pub fn put_raw(&self, key: &str, raw: &str) {
        self.store.insert(key.to_string(), raw.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.store.get(key).map(|v| v.value().clone()))
    }

    async fn save(&self, key: &str, raw: String, _ttl: Duration) -> Result<(), CacheError> {
        // Over capacity: only existing keys may be overwritten.
        if self.store.len() >= self.max_entries && !self.store.contains_key(key) {
            return Err(CacheError::Backend(format!(
                "memory store full ({} entries)",
                self.max_entries
            )));
        }
        self.store.insert(key.to_string(), raw);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.store.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.store.iter().map(|e| e.key().clone()).collect())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.store.clear();
        Ok(())
    }
}
