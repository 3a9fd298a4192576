//! Metric derivation: ratios computed from summed counters.
//!
//! Every function returns 0.0 when its denominator is zero, so no NaN or
//! infinity ever leaves this module for non-negative inputs.

use crate::types::Counters;
use serde::{Deserialize, Serialize};

#[inline]
fn ratio(numerator: f64, denominator: f64, scale: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator * scale
    } else {
        0.0
    }
}

/// Click-through rate in percent.
pub fn ctr(impressions: u64, clicks: u64) -> f64 {
    ratio(clicks as f64, impressions as f64, 100.0)
}

/// Cost per click.
pub fn cpc(clicks: u64, cost: f64) -> f64 {
    ratio(cost, clicks as f64, 1.0)
}

/// Cost per acquisition (conversion).
pub fn cpa(conversions: f64, cost: f64) -> f64 {
    ratio(cost, conversions, 1.0)
}

/// Cost per thousand impressions.
pub fn cpm(impressions: u64, cost: f64) -> f64 {
    ratio(cost, impressions as f64, 1000.0)
}

/// Conversion rate in percent of clicks.
pub fn cvr(clicks: u64, conversions: f64) -> f64 {
    ratio(conversions, clicks as f64, 100.0)
}

/// Return on ad spend in percent (`value / cost * 100`).
pub fn roas(cost: f64, value: f64) -> f64 {
    ratio(value, cost, 100.0)
}

/// Impressions per unique reached user.
pub fn frequency(impressions: u64, reach: u64) -> f64 {
    ratio(impressions as f64, reach as f64, 1.0)
}

/// Engagements in percent of impressions.
pub fn engagement_rate(impressions: u64, engagements: u64) -> f64 {
    ratio(engagements as f64, impressions as f64, 100.0)
}

/// All ratios for one set of counters. Never stored, always re-derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub ctr: f64,
    pub cpc: f64,
    pub cpa: f64,
    pub cpm: f64,
    pub cvr: f64,
    pub roas: f64,
    pub frequency: f64,
    pub engagement_rate: f64,
}

impl DerivedMetrics {
    pub fn from_counters(c: &Counters) -> Self {
        Self {
            ctr: ctr(c.impressions, c.clicks),
            cpc: cpc(c.clicks, c.cost),
            cpa: cpa(c.conversions, c.cost),
            cpm: cpm(c.impressions, c.cost),
            cvr: cvr(c.clicks, c.conversions),
            roas: roas(c.cost, c.conversion_value),
            frequency: frequency(c.impressions, c.reach),
            engagement_rate: engagement_rate(c.impressions, c.engagements),
        }
    }

    fn values(&self) -> [f64; 8] {
        [
            self.ctr,
            self.cpc,
            self.cpa,
            self.cpm,
            self.cvr,
            self.roas,
            self.frequency,
            self.engagement_rate,
        ]
    }

    pub fn all_finite(&self) -> bool {
        self.values().iter().all(|v| v.is_finite())
    }
}
