//! Storage backends behind the cache layer. Stores hold opaque encoded
//! strings; staleness and decoding live in [`crate::layer`].

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis cache error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl From<CacheError> for campaign_core::InsightsError {
    fn from(e: CacheError) -> Self {
        Self::Cache(e.to_string())
    }
}

/// Key-value persistence used by the cache layer. Call sites never touch a
/// store directly. Every method is async so disk and network backends never
/// block a runtime worker.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// `ttl` is a hint for backends with native expiry; validity is still
    /// decided by the layer.
    async fn save(&self, key: &str, raw: String, ttl: Duration) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    async fn clear(&self) -> Result<(), CacheError> {
        for key in self.keys().await? {
            self.remove(&key).await?;
        }
        Ok(())
    }
}
