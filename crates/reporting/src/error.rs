use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Invalid simulation input `{field}`: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("Unknown campaign in simulation: {0}")]
    UnknownCampaign(String),
}

impl SimulationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

/// Reject NaN and infinities before any arithmetic happens.
pub(crate) fn require_finite(field: &'static str, value: f64) -> Result<f64, SimulationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SimulationError::invalid(field, "must be a finite number"))
    }
}
