//! TTL cache layer: a passive staleness oracle in front of a store.
//!
//! An entry is valid while `now - fetched_at < ttl`. Absent, expired, and
//! undecodable entries are all misses; undecodable ones are purged. The
//! layer never fetches or retries: on a miss the caller fetches and calls
//! [`CacheLayer::set`].

use crate::local::MemoryStore;
use crate::store::{CacheError, CacheStore};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Well-known cache keys.
pub mod keys {
    /// Last full (unfiltered) record fetch.
    pub const RECORDS: &str = "records_cache";
    /// Last account list.
    pub const ACCOUNTS: &str = "accounts_cache";

    /// Record fetch scoped to one account, or the full fetch for `None`.
    pub fn records_for(account_id: Option<&str>) -> String {
        match account_id {
            Some(id) => format!("{RECORDS}::{id}"),
            None => RECORDS.to_string(),
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests and replays.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Encoded form of every stored value. Written in one store call, so an
/// entry is never partially updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    pub fetched_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.fetched_at < ttl
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }
}

pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self::with_clock(store, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CacheStore>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { store, ttl, clock }
    }

    /// In-memory layer, mostly for tests.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryStore::default()), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Raw read; store errors are logged and count as a miss.
    async fn load_raw(&self, key: &str) -> Option<String> {
        match self.store.load(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = key, error = %e, "Cache store read failed, treating as miss");
                None
            }
        }
    }

    async fn purge_corrupt(&self, key: &str, error: &serde_json::Error) {
        warn!(key = key, error = %error, "Undecodable cache entry purged");
        metrics::counter!("cache.purged").increment(1);
        if let Err(e) = self.store.remove(key).await {
            warn!(key = key, error = %e, "Failed to purge cache entry");
        }
    }

    async fn decode<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = self.load_raw(key).await?;
        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                self.purge_corrupt(key, &e).await;
                None
            }
        }
    }

    /// Valid entry including its fetch time, or `None` on any kind of miss.
    pub async fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = self.clock.now();
        match self.decode::<T>(key).await {
            Some(entry) if entry.is_valid_at(now, self.ttl) => {
                metrics::counter!("cache.hit").increment(1);
                debug!(key = key, age_secs = entry.age(now).num_seconds(), "Cache hit");
                Some(entry)
            }
            Some(entry) => {
                metrics::counter!("cache.miss").increment(1);
                debug!(key = key, age_secs = entry.age(now).num_seconds(), "Cache entry expired");
                None
            }
            None => {
                metrics::counter!("cache.miss").increment(1);
                debug!(key = key, "Cache miss");
                None
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_entry(key).await.map(|e| e.payload)
    }

    /// Store `value` stamped with the current time, replacing any entry.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.to_string(),
            payload: value,
            fetched_at: self.clock.now(),
        };
        let raw = serde_json::to_string(&entry)?;
        self.store.save(key, raw, self.ttl).await?;
        debug!(key = key, "Cache entry stored");
        Ok(())
    }

    /// Whether a decodable, unexpired entry exists. Does not check that the
    /// payload matches any particular type.
    pub async fn is_valid(&self, key: &str) -> bool {
        self.decode::<IgnoredAny>(key)
            .await
            .is_some_and(|e| e.is_valid_at(self.clock.now(), self.ttl))
    }

    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            warn!(key = key, error = %e, "Cache invalidation failed");
        }
    }

    /// Remove every entry; returns the keys that were present.
    pub async fn invalidate_all(&self) -> Vec<String> {
        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Could not list cache keys");
                Vec::new()
            }
        };
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Cache clear failed");
        }
        debug!(count = keys.len(), "Cache invalidated");
        keys
    }

    /// Drop expired and undecodable entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(_) => return 0,
        };
        let mut removed = 0;
        for key in keys {
            let Some(raw) = self.load_raw(&key).await else { continue };
            let keep = match serde_json::from_str::<CacheEntry<IgnoredAny>>(&raw) {
                Ok(entry) => entry.is_valid_at(self.clock.now(), self.ttl),
                Err(_) => false,
            };
            if !keep {
                self.invalidate(&key).await;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed = removed, "Cache maintenance complete");
        }
        removed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture() -> (CacheLayer, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let layer = CacheLayer::with_clock(store.clone(), Duration::hours(24), clock.clone());
        (layer, store, clock)
    }

    #[tokio::test]
    async fn test_valid_until_ttl_boundary() {
        let (layer, _, clock) = fixture();
        layer.set(keys::RECORDS, &vec![1, 2, 3]).await.unwrap();

        clock.advance(Duration::hours(24) - Duration::seconds(1));
        assert!(layer.is_valid(keys::RECORDS).await);
        assert_eq!(layer.get::<Vec<i32>>(keys::RECORDS).await, Some(vec![1, 2, 3]));

        clock.advance(Duration::seconds(1));
        assert!(!layer.is_valid(keys::RECORDS).await);
        assert_eq!(layer.get::<Vec<i32>>(keys::RECORDS).await, None);
    }

    #[tokio::test]
    async fn test_absent_key_is_miss() {
        let (layer, _, _) = fixture();
        assert!(!layer.is_valid(keys::ACCOUNTS).await);
        assert_eq!(layer.get::<Vec<String>>(keys::ACCOUNTS).await, None);
    }

    #[tokio::test]
    async fn test_corrupt_entry_purged() {
        let (layer, store, _) = fixture();
        store.put_raw(keys::RECORDS, "{not json");
        assert_eq!(layer.get::<Vec<i32>>(keys::RECORDS).await, None);
        assert_eq!(store.load(keys::RECORDS).await.unwrap(), None);

        // Valid envelope, wrong payload type.
        layer.set(keys::ACCOUNTS, &"text").await.unwrap();
        assert_eq!(layer.get::<Vec<i32>>(keys::ACCOUNTS).await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_entry_roundtrip() {
        let (layer, store, clock) = fixture();
        let payload = vec!["acct-1".to_string(), "acct-2".to_string()];
        layer.set(keys::ACCOUNTS, &payload).await.unwrap();

        let raw = store.load(keys::ACCOUNTS).await.unwrap().unwrap();
        let decoded: CacheEntry<Vec<String>> = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.key, keys::ACCOUNTS);
        assert_eq!(decoded.fetched_at, clock.now());

        let entry = layer.get_entry::<Vec<String>>(keys::ACCOUNTS).await.unwrap();
        assert_eq!(entry, decoded);
    }

    #[tokio::test]
    async fn test_overwrite_restamps() {
        let (layer, _, clock) = fixture();
        layer.set(keys::RECORDS, &1).await.unwrap();
        clock.advance(Duration::hours(23));
        layer.set(keys::RECORDS, &2).await.unwrap();
        clock.advance(Duration::hours(23));
        assert_eq!(layer.get::<i32>(keys::RECORDS).await, Some(2));
    }

    #[tokio::test]
    async fn test_invalidate_all_and_purge() {
        let (layer, store, clock) = fixture();
        layer.set(keys::RECORDS, &1).await.unwrap();
        layer.set(&keys::records_for(Some("acct-1")), &2).await.unwrap();
        let mut removed = layer.invalidate_all().await;
        removed.sort();
        assert_eq!(removed, vec!["records_cache", "records_cache::acct-1"]);
        assert!(store.is_empty());

        layer.set(keys::RECORDS, &1).await.unwrap();
        clock.advance(Duration::hours(12));
        layer.set(keys::ACCOUNTS, &2).await.unwrap();
        store.put_raw("junk", "???");
        clock.advance(Duration::hours(13));
        assert_eq!(layer.purge_expired().await, 2);
        assert!(layer.is_valid(keys::ACCOUNTS).await);
    }

    #[test]
    fn test_records_key() {
        assert_eq!(keys::records_for(None), "records_cache");
        assert_eq!(keys::records_for(Some("a1")), "records_cache::a1");
    }
}
