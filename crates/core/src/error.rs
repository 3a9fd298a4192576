use thiserror::Error;

pub type InsightsResult<T> = Result<T, InsightsError>;

#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache store error: {0}")]
    Cache(String),

    #[error("Remote fetch error: {0}")]
    Fetch(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for InsightsError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
