#![warn(clippy::unwrap_used)]

//! Shared data model for the campaign metrics engine: raw reporting records,
//! summed counters, derived ratios, configuration, and the sync event bus.

pub mod coerce;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod types;

pub use config::AppConfig;
pub use error::{InsightsError, InsightsResult};
pub use event_bus::{SyncBus, SyncEvent, WeakSyncBus};
pub use metrics::DerivedMetrics;
pub use types::{AggregateRow, CampaignRecord, Counters};
