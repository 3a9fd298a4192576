//! Filter pipeline: date range, account, and campaign predicates applied in
//! a fixed order before aggregation.
//!
//! Dates are compared at calendar-day granularity. Instants are converted to
//! days in the caller's timezone (local midnight), never UTC midnight.

use campaign_core::types::CampaignRecord;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Calendar day of an instant in the given timezone.
pub fn local_day<Tz: TimeZone>(ts: DateTime<Utc>, tz: &Tz) -> NaiveDate {
    ts.with_timezone(tz).date_naive()
}

/// Inclusive day range. A missing bound is unbounded in that direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self::new(Some(day), Some(day))
    }

    /// The `n` days ending on (and including) `today`.
    pub fn last_n_days(n: u32, today: NaiveDate) -> Self {
        let span = Duration::days(n.saturating_sub(1) as i64);
        Self::new(Some(today - span), Some(today))
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start.map_or(true, |s| day >= s) && self.end.map_or(true, |e| day <= e)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// One predicate of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterStage {
    DateRange(DateRange),
    Account(String),
    Campaign(String),
}

impl FilterStage {
    pub fn matches(&self, record: &CampaignRecord) -> bool {
        match self {
            Self::DateRange(range) => range.contains(record.date),
            Self::Account(id) => record.account() == Some(id.as_str()),
            Self::Campaign(name) => record.campaign_label() == name.as_str(),
        }
    }
}

/// The user's current filter selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub date_range: DateRange,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub campaign: Option<String>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.date_range = range;
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_campaign(mut self, campaign: impl Into<String>) -> Self {
        self.campaign = Some(campaign.into());
        self
    }

    /// A dimension filter narrows the record set at the source (one account).
    pub fn is_dimension_filtered(&self) -> bool {
        self.account_id.is_some()
    }

    /// Active stages in application order: date range, account, campaign.
    pub fn stages(&self) -> Vec<FilterStage> {
        let mut stages = Vec::with_capacity(3);
        if !self.date_range.is_unbounded() {
            stages.push(FilterStage::DateRange(self.date_range));
        }
        if let Some(id) = &self.account_id {
            stages.push(FilterStage::Account(id.clone()));
        }
        if let Some(name) = &self.campaign {
            stages.push(FilterStage::Campaign(name.clone()));
        }
        stages
    }

    /// Returns a new sequence; the input is never modified.
    pub fn apply(&self, records: &[CampaignRecord]) -> Vec<CampaignRecord> {
        let stages = self.stages();
        records
            .iter()
            .filter(|r| stages.iter().all(|s| s.matches(r)))
            .cloned()
            .collect()
    }
}
