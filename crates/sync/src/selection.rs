//! The user's current view selection and how much of it each slice
//! depends on.

use campaign_core::types::Granularity;
use campaign_reporting::filter::{DateRange, RecordFilter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceKind {
    Records,
    Summary,
    Trends,
    Accounts,
}

impl SliceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::Summary => "summary",
            Self::Trends => "trends",
            Self::Accounts => "accounts",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub account_id: Option<String>,
    #[serde(default)]
    pub range: DateRange,
    #[serde(default)]
    pub granularity: Granularity,
}

impl Selection {
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn account(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Whether `kind` is fetched under a dimension filter. The account list
    /// is always fetched whole.
    pub fn is_dimension_filtered(&self, kind: SliceKind) -> bool {
        kind != SliceKind::Accounts && self.account_id.is_some()
    }

    /// The part of the selection a slice's data depends on. Two selections
    /// with equal scopes can share a slice's data.
    pub fn scope(&self, kind: SliceKind) -> Selection {
        match kind {
            SliceKind::Records => Selection {
                account_id: self.account_id.clone(),
                ..Default::default()
            },
            SliceKind::Summary => Selection {
                account_id: self.account_id.clone(),
                range: self.range,
                ..Default::default()
            },
            SliceKind::Trends => self.clone(),
            SliceKind::Accounts => Selection::default(),
        }
    }

    /// Local filter matching this selection, for views over the records slice.
    pub fn record_filter(&self) -> RecordFilter {
        RecordFilter {
            date_range: self.range,
            account_id: self.account_id.clone(),
            campaign: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_scopes() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let a = Selection::default()
            .with_account("acct-1")
            .with_range(DateRange::single_day(day));
        let b = a.clone().with_granularity(Granularity::Week);

        assert_eq!(a.scope(SliceKind::Records), b.scope(SliceKind::Records));
        assert_eq!(a.scope(SliceKind::Summary), b.scope(SliceKind::Summary));
        assert_ne!(a.scope(SliceKind::Trends), b.scope(SliceKind::Trends));

        let c = Selection::default();
        assert_ne!(a.scope(SliceKind::Records), c.scope(SliceKind::Records));
        assert_eq!(a.scope(SliceKind::Accounts), c.scope(SliceKind::Accounts));
        assert!(a.scope(SliceKind::Records).range.is_unbounded());
    }

    #[test]
    fn test_accounts_never_filtered() {
        let a = Selection::default().with_account("acct-1");
        assert!(a.is_dimension_filtered(SliceKind::Records));
        assert!(a.is_dimension_filtered(SliceKind::Trends));
        assert!(!a.is_dimension_filtered(SliceKind::Accounts));
        assert!(!Selection::default().is_dimension_filtered(SliceKind::Records));
    }

    #[test]
    fn test_record_filter() {
        let a = Selection::default().with_account("acct-1");
        let f = a.record_filter();
        assert!(f.is_dimension_filtered());
        assert_eq!(f.account_id.as_deref(), Some("acct-1"));
    }
}
