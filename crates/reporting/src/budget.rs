//! Budget reallocation simulator: per-campaign spend multipliers with a
//! diminishing-returns efficiency curve.
//!
//! Closed form, no iteration: identical inputs always give bit-identical
//! projections.

use crate::error::{require_finite, SimulationError};
use campaign_core::config::SimulatorConfig;
use campaign_core::metrics;
use campaign_core::types::{AggregateRow, UNKNOWN_CAMPAIGN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Snapshot of one campaign's baseline performance. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignBaseline {
    pub campaign: String,
    pub cost: f64,
    pub conversions: f64,
    pub conversion_value: f64,
    pub cpa: f64,
    /// Percent, `value / cost * 100`.
    pub roas: f64,
}

impl CampaignBaseline {
    pub fn new(campaign: impl Into<String>, cost: f64, conversions: f64, conversion_value: f64) -> Self {
        Self {
            campaign: campaign.into(),
            cpa: metrics::cpa(conversions, cost),
            roas: metrics::roas(cost, conversion_value),
            cost,
            conversions,
            conversion_value,
        }
    }

    pub fn from_row(row: &AggregateRow) -> Self {
        let campaign = row
            .key
            .campaign
            .clone()
            .unwrap_or_else(|| UNKNOWN_CAMPAIGN.to_string());
        Self::new(
            campaign,
            row.counters.cost,
            row.counters.conversions,
            row.counters.conversion_value,
        )
    }
}

/// Linear efficiency response to a spend multiplier, clamped to [floor, cap].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyCurve {
    pub rate: f64,
    pub floor: f64,
    pub cap: f64,
}

impl EfficiencyCurve {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self {
            rate: config.efficiency_rate,
            floor: config.efficiency_floor,
            cap: config.efficiency_cap,
        }
    }

    /// 1.0 at multiplier 1.0; spending more saturates, cutting spend improves.
    pub fn efficiency(&self, multiplier: f64) -> f64 {
        // A floor above the cap yields the cap.
        (1.0 - (multiplier - 1.0) * self.rate).max(self.floor).min(self.cap)
    }
}

impl Default for EfficiencyCurve {
    fn default() -> Self {
        Self::from_config(&SimulatorConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignProjection {
    pub campaign: String,
    pub multiplier: f64,
    pub efficiency: f64,
    pub baseline: CampaignBaseline,
    pub new_cost: f64,
    pub new_conversions: f64,
    pub new_value: f64,
    pub new_cpa: f64,
    pub new_roas: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioTotals {
    pub cost: f64,
    pub conversions: f64,
    pub value: f64,
    pub cpa: f64,
    pub roas: f64,
}

impl PortfolioTotals {
    fn from_sums(cost: f64, conversions: f64, value: f64) -> Self {
        Self {
            cost,
            conversions,
            value,
            cpa: metrics::cpa(conversions, cost),
            roas: metrics::roas(cost, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioProjection {
    pub campaigns: Vec<CampaignProjection>,
    pub baseline: PortfolioTotals,
    pub projected: PortfolioTotals,
    pub delta_cost: f64,
    pub delta_conversions: f64,
    pub delta_value: f64,
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

pub fn simulate(baseline: &CampaignBaseline, multiplier: f64, curve: &EfficiencyCurve) -> CampaignProjection {
    let efficiency = curve.efficiency(multiplier);
    let new_cost = baseline.cost * multiplier;
    let new_conversions = if baseline.cpa > 0.0 {
        new_cost / baseline.cpa * efficiency
    } else {
        0.0
    };
    let new_value = if baseline.roas > 0.0 {
        new_cost * (baseline.roas / 100.0) * efficiency
    } else {
        0.0
    };

    CampaignProjection {
        campaign: baseline.campaign.clone(),
        multiplier,
        efficiency,
        baseline: baseline.clone(),
        new_cost,
        new_conversions,
        new_value,
        new_cpa: metrics::cpa(new_conversions, new_cost),
        new_roas: metrics::roas(new_cost, new_value),
    }
}

/// Portfolio totals are sums of campaign projections; ROAS and CPA are
/// re-derived from those sums.
pub fn summarize_portfolio(campaigns: Vec<CampaignProjection>) -> PortfolioProjection {
    let (mut b_cost, mut b_conv, mut b_value) = (0.0, 0.0, 0.0);
    let (mut p_cost, mut p_conv, mut p_value) = (0.0, 0.0, 0.0);
    for c in &campaigns {
        b_cost += c.baseline.cost;
        b_conv += c.baseline.conversions;
        b_value += c.baseline.conversion_value;
        p_cost += c.new_cost;
        p_conv += c.new_conversions;
        p_value += c.new_value;
    }

    PortfolioProjection {
        campaigns,
        baseline: PortfolioTotals::from_sums(b_cost, b_conv, b_value),
        projected: PortfolioTotals::from_sums(p_cost, p_conv, p_value),
        delta_cost: p_cost - b_cost,
        delta_conversions: p_conv - b_conv,
        delta_value: p_value - b_value,
    }
}

// ---------------------------------------------------------------------------
// SimulationState
// ---------------------------------------------------------------------------

/// One simulation session: an immutable baseline snapshot plus the user's
/// per-campaign multipliers.
#[derive(Debug, Clone)]
pub struct SimulationState {
    baselines: Vec<CampaignBaseline>,
    multipliers: BTreeMap<String, f64>,
    curve: EfficiencyCurve,
    max_multiplier: f64,
}

impl SimulationState {
    /// Snapshot campaign-level aggregate rows.
    pub fn from_rows(rows: &[AggregateRow], config: &SimulatorConfig) -> Self {
        Self::from_baselines(rows.iter().map(CampaignBaseline::from_row).collect(), config)
    }

    pub fn from_baselines(baselines: Vec<CampaignBaseline>, config: &SimulatorConfig) -> Self {
        Self {
            baselines,
            multipliers: BTreeMap::new(),
            curve: EfficiencyCurve::from_config(config),
            max_multiplier: config.max_multiplier,
        }
    }

    pub fn baselines(&self) -> &[CampaignBaseline] {
        &self.baselines
    }

    pub fn curve(&self) -> &EfficiencyCurve {
        &self.curve
    }

    /// Set a campaign's multiplier. Values outside `[0, max]` are clamped;
    /// the applied value is returned.
    pub fn set_multiplier(&mut self, campaign: &str, multiplier: f64) -> Result<f64, SimulationError> {
        if !self.baselines.iter().any(|b| b.campaign == campaign) {
            return Err(SimulationError::UnknownCampaign(campaign.to_string()));
        }
        let requested = require_finite("multiplier", multiplier)?;
        let applied = requested.max(0.0).min(self.max_multiplier.max(0.0));
        if applied != requested {
            warn!(
                campaign = campaign,
                requested = requested,
                applied = applied,
                "Spend multiplier out of range, clamped"
            );
        }
        self.multipliers.insert(campaign.to_string(), applied);
        Ok(applied)
    }

    pub fn multiplier(&self, campaign: &str) -> f64 {
        self.multipliers.get(campaign).copied().unwrap_or(1.0)
    }

    /// Drop every multiplier; the baseline snapshot is untouched.
    pub fn reset(&mut self) {
        self.multipliers.clear();
    }

    pub fn project_campaign(&self, campaign: &str) -> Option<CampaignProjection> {
        self.baselines
            .iter()
            .find(|b| b.campaign == campaign)
            .map(|b| simulate(b, self.multiplier(&b.campaign), &self.curve))
    }

    pub fn project_portfolio(&self) -> PortfolioProjection {
        let campaigns = self
            .baselines
            .iter()
            .map(|b| simulate(b, self.multiplier(&b.campaign), &self.curve))
            .collect();
        summarize_portfolio(campaigns)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
