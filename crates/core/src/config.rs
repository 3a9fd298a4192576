use crate::types::RowOrder;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_INSIGHTS__` and an optional TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
    Redis,
}

impl std::str::FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown cache backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

/// Efficiency curve of the budget simulator.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: f64,
    /// Efficiency change per unit of multiplier (1.0 = 0.1 per 0.1).
    #[serde(default = "default_efficiency_rate")]
    pub efficiency_rate: f64,
    #[serde(default = "default_efficiency_floor")]
    pub efficiency_floor: f64,
    #[serde(default = "default_efficiency_cap")]
    pub efficiency_cap: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportingConfig {
    #[serde(default)]
    pub default_order: RowOrder,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

// Default functions
fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_cache_dir() -> String {
    ".campaign-cache".to_string()
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_max_multiplier() -> f64 {
    2.0
}
fn default_efficiency_rate() -> f64 {
    1.0
}
fn default_efficiency_floor() -> f64 {
    0.5
}
fn default_efficiency_cap() -> f64 {
    1.5
}
fn default_top_n() -> usize {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            backend: CacheBackend::default(),
            dir: default_cache_dir(),
            redis_url: default_redis_url(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_multiplier: default_max_multiplier(),
            efficiency_rate: default_efficiency_rate(),
            efficiency_floor: default_efficiency_floor(),
            efficiency_cap: default_efficiency_cap(),
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            default_order: RowOrder::default(),
            top_n: default_top_n(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `campaign-insights.toml` (if present) and
    /// environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("campaign-insights")
    }

    /// Load with an explicit config file stem; a missing file is not an error.
    pub fn load_from(file: &str) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("CAMPAIGN_INSIGHTS")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.simulator.max_multiplier, 2.0);
        assert_eq!(config.simulator.efficiency_floor, 0.5);
        assert_eq!(config.simulator.efficiency_cap, 1.5);
        assert_eq!(config.reporting.default_order, RowOrder::DateDesc);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"cache": {"ttl_secs": 60, "backend": "file"}}"#).unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.backend, CacheBackend::File);
        assert_eq!(config.cache.dir, ".campaign-cache");
        assert_eq!(config.simulator.efficiency_rate, 1.0);
    }

    #[test]
    fn test_load_without_file() {
        let config = AppConfig::load_from("does-not-exist-campaign-insights").unwrap();
        assert!(config.cache.ttl_secs > 0);
    }
}
