use crate::coerce::{self, lenient_f64, lenient_name, lenient_u64, optional_name};
use crate::metrics::DerivedMetrics;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

/// Group label used for records whose campaign name is blank.
pub const UNKNOWN_CAMPAIGN: &str = "(unknown campaign)";

/// One reporting row as exported by an ad platform. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    #[serde(default, deserialize_with = "lenient_name")]
    pub id: String,
    #[serde(deserialize_with = "calendar_day")]
    pub date: NaiveDate,
    #[serde(default, alias = "campaignName", deserialize_with = "lenient_name")]
    pub campaign_name: String,
    #[serde(default, alias = "adSetName", alias = "adsetName", deserialize_with = "optional_name")]
    pub ad_set_name: Option<String>,
    #[serde(default, alias = "adName", deserialize_with = "optional_name")]
    pub ad_name: Option<String>,
    #[serde(default, alias = "accountId", deserialize_with = "optional_name")]
    pub account_id: Option<String>,
    #[serde(default, alias = "accountName", deserialize_with = "optional_name")]
    pub account_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub impressions: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub clicks: u64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cost: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub conversions: f64,
    #[serde(default, alias = "conversionValue", deserialize_with = "lenient_f64")]
    pub conversion_value: f64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub reach: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub engagements: u64,
    #[serde(default, alias = "linkClicks", deserialize_with = "lenient_u64")]
    pub link_clicks: u64,
    #[serde(default, alias = "landingPageViews", deserialize_with = "lenient_u64")]
    pub landing_page_views: u64,
}

impl CampaignRecord {
    /// Campaign label used for grouping; blank names fold into a sentinel.
    pub fn campaign_label(&self) -> &str {
        let trimmed = self.campaign_name.trim();
        if trimmed.is_empty() {
            UNKNOWN_CAMPAIGN
        } else {
            trimmed
        }
    }

    pub fn ad_set(&self) -> Option<&str> {
        self.ad_set_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn ad(&self) -> Option<&str> {
        self.ad_name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn account(&self) -> Option<&str> {
        self.account_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Accepts `YYYY-MM-DD`, or a timestamp whose first ten characters are one.
fn calendar_day<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let day = raw.trim().get(..10).unwrap_or(raw.trim());
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(serde::de::Error::custom)
}

/// Summable counters. Ratios are always derived from these sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub impressions: u64,
    pub clicks: u64,
    pub cost: f64,
    pub conversions: f64,
    pub conversion_value: f64,
    pub reach: u64,
    pub engagements: u64,
    pub link_clicks: u64,
    pub landing_page_views: u64,
}

impl Counters {
    pub fn add_record(&mut self, r: &CampaignRecord) {
        self.impressions = self.impressions.saturating_add(r.impressions);
        self.clicks = self.clicks.saturating_add(r.clicks);
        self.cost += coerce::non_negative(r.cost);
        self.conversions += coerce::non_negative(r.conversions);
        self.conversion_value += coerce::non_negative(r.conversion_value);
        self.reach = self.reach.saturating_add(r.reach);
        self.engagements = self.engagements.saturating_add(r.engagements);
        self.link_clicks = self.link_clicks.saturating_add(r.link_clicks);
        self.landing_page_views = self.landing_page_views.saturating_add(r.landing_page_views);
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CampaignRecord>) -> Self {
        let mut c = Self::default();
        for r in records {
            c.add_record(r);
        }
        c
    }

    pub fn derive(&self) -> DerivedMetrics {
        DerivedMetrics::from_counters(self)
    }
}

/// Grouping key of an aggregate row. Unused dimensions are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub date: Option<NaiveDate>,
    pub campaign: Option<String>,
    pub ad_set: Option<String>,
    pub ad: Option<String>,
    pub account: Option<String>,
}

/// Summed counters for one group plus ratios derived from those sums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub key: GroupKey,
    pub counters: Counters,
    pub metrics: DerivedMetrics,
    pub record_count: usize,
}

impl AggregateRow {
    pub fn new(key: GroupKey, counters: Counters, record_count: usize) -> Self {
        Self {
            metrics: counters.derive(),
            key,
            counters,
            record_count,
        }
    }
}

/// Portfolio-wide totals for the current record set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryTotals {
    pub counters: Counters,
    pub metrics: DerivedMetrics,
    pub record_count: usize,
    pub campaign_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

/// Trend bucket width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Day,
    Week,
    Month,
}

impl Granularity {
    /// First calendar day of the bucket containing `date`. Weeks start Monday.
    pub fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Day => date,
            Self::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Self::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" => Ok(Self::Week),
            "month" | "monthly" => Ok(Self::Month),
            other => Err(format!("unknown granularity: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub period_start: NaiveDate,
    pub counters: Counters,
    pub metrics: DerivedMetrics,
}

/// Output ordering for aggregate rows. Ties always fall through to the
/// fixed chain date, campaign, ad-set, ad, account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOrder {
    #[default]
    DateDesc,
    CampaignAsc,
}

impl std::str::FromStr for RowOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "date_desc" | "date" => Ok(Self::DateDesc),
            "campaign_asc" | "campaign" => Ok(Self::CampaignAsc),
            other => Err(format!("unknown row order: {other}")),
        }
    }
}

/// One advertising account present in the record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub name: String,
    pub record_count: usize,
    pub latest_date: Option<NaiveDate>,
}
