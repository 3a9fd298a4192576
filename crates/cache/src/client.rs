//! Redis-backed store for cache entries shared across processes.
//! Entries are written with `SET EX` so Redis drops them at the TTL even
//! if nobody reads them again.

use crate::store::{CacheError, CacheStore};
use async_trait::async_trait;
use chrono::Duration;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

const KEY_PREFIX: &str = "campaign-insights:";

/// One multiplexed connection, cloned per call; clones share the socket.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect and verify the server answers PING.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url)?;

        let mut conn = client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self { conn })
    }

    fn full_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(Self::full_key(key)).await?;
        Ok(data)
    }

    async fn save(&self, key: &str, raw: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let secs = ttl.num_seconds().max(1) as u64;
        conn.set_ex::<_, _, ()>(Self::full_key(key), raw, secs).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::full_key(key)).await?;
        Ok(())
    }

    /// Incremental `SCAN` over the prefix, so a large keyspace never blocks
    /// the server the way `KEYS` would.
    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut iter = conn
            .scan_match::<_, String>(format!("{KEY_PREFIX}*"))
            .await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            if let Some(stripped) = key.strip_prefix(KEY_PREFIX) {
                keys.push(stripped.to_string());
            }
        }
        Ok(keys)
    }
}
