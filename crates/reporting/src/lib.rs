#![warn(clippy::unwrap_used)]

//! Campaign reporting: filter pipeline, multi-dimension aggregation, and
//! the budget and break-even what-if simulators.

pub mod aggregate;
pub mod breakeven;
pub mod budget;
pub mod error;
pub mod filter;

pub use aggregate::{Aggregator, Grouping, RankMetric, Report};
pub use breakeven::{BreakEvenAnalysis, ProfitProjection, UnitEconomics};
pub use budget::{CampaignBaseline, EfficiencyCurve, PortfolioProjection, SimulationState};
pub use error::SimulationError;
pub use filter::{DateRange, RecordFilter};
