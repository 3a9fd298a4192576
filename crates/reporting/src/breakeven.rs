//! Unit-economics break-even analysis.
//!
//! ROAS is `value / cost * 100` everywhere in the engine. With one unit of
//! value equal to the sale price and one unit of cost equal to the CPA, the
//! ROAS implied by a CPA is `price / cpa * 100`, so the break-even ROAS is
//! `price / gross_margin * 100`: the point where ad spend per conversion
//! consumes the whole gross margin.

use crate::error::{require_finite, SimulationError};
use campaign_core::metrics;
use serde::{Deserialize, Serialize};

/// User-supplied unit economics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitEconomics {
    pub price: f64,
    pub cost_of_goods: f64,
    pub other_expenses: f64,
    pub baseline_cpa: f64,
    pub monthly_conversions: f64,
}

impl UnitEconomics {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if require_finite("price", self.price)? <= 0.0 {
            return Err(SimulationError::invalid("price", "must be greater than zero"));
        }
        if require_finite("cost_of_goods", self.cost_of_goods)? < 0.0 {
            return Err(SimulationError::invalid("cost_of_goods", "must not be negative"));
        }
        if require_finite("other_expenses", self.other_expenses)? < 0.0 {
            return Err(SimulationError::invalid("other_expenses", "must not be negative"));
        }
        if require_finite("baseline_cpa", self.baseline_cpa)? < 0.0 {
            return Err(SimulationError::invalid("baseline_cpa", "must not be negative"));
        }
        if require_finite("monthly_conversions", self.monthly_conversions)? <= 0.0 {
            return Err(SimulationError::invalid(
                "monthly_conversions",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitProjection {
    pub simulated_cpa: f64,
    pub profit_per_unit: f64,
    pub total_monthly_profit: f64,
    /// Profit per unit as a percent of price.
    pub margin_percent: f64,
    /// ROAS implied by the simulated CPA (`price / cpa * 100`).
    pub implied_roas: f64,
    pub is_profitable: bool,
}

/// Break-even figures that depend only on the static unit economics.
/// Re-evaluating a different CPA never recomputes them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakEvenAnalysis {
    pub inputs: UnitEconomics,
    pub gross_margin_per_unit: f64,
    pub break_even_cpa: f64,
    pub break_even_roas: f64,
}

impl BreakEvenAnalysis {
    pub fn analyze(inputs: UnitEconomics) -> Result<Self, SimulationError> {
        inputs.validate()?;
        let gross_margin_per_unit = inputs.price - inputs.cost_of_goods - inputs.other_expenses;
        let break_even_roas = if gross_margin_per_unit > 0.0 {
            inputs.price / gross_margin_per_unit * 100.0
        } else {
            0.0
        };
        Ok(Self {
            inputs,
            gross_margin_per_unit,
            break_even_cpa: gross_margin_per_unit,
            break_even_roas,
        })
    }

    pub fn evaluate(&self, simulated_cpa: f64) -> Result<ProfitProjection, SimulationError> {
        if require_finite("simulated_cpa", simulated_cpa)? < 0.0 {
            return Err(SimulationError::invalid("simulated_cpa", "must not be negative"));
        }
        Ok(self.project(simulated_cpa))
    }

    /// Projection at the baseline CPA (validated on construction).
    pub fn baseline(&self) -> ProfitProjection {
        self.project(self.inputs.baseline_cpa)
    }

    fn project(&self, cpa: f64) -> ProfitProjection {
        let profit_per_unit = self.gross_margin_per_unit - cpa;
        ProfitProjection {
            simulated_cpa: cpa,
            profit_per_unit,
            total_monthly_profit: profit_per_unit * self.inputs.monthly_conversions,
            margin_percent: profit_per_unit / self.inputs.price * 100.0,
            implied_roas: metrics::roas(cpa, self.inputs.price),
            is_profitable: profit_per_unit > 0.0,
        }
    }
}
