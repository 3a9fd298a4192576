//! Aggregator: groups records by date / campaign / ad-set / ad / account,
//! sums counters, and derives ratios once from the sums.
//!
//! Ratios are never averaged across rows: an average of per-row CTRs is
//! biased whenever row volumes differ. Every reporting view (tables,
//! summary cards, trend charts, account pickers) goes through this module so
//! totals cannot drift between views.

use crate::filter::RecordFilter;
use campaign_core::config::ReportingConfig;
use campaign_core::types::{
    AccountInfo, AggregateRow, CampaignRecord, Counters, Granularity, GroupKey, RowOrder,
    SummaryTotals, TrendPoint,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Which dimensions form the grouping key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    Date,
    Campaign,
    DateCampaign,
    Account,
    /// Per-record rule: date+campaign+ad-set+ad when an ad name is present,
    /// date+campaign+ad-set when only an ad-set is present, else date+campaign.
    #[default]
    Detail,
}

impl Grouping {
    pub fn key_for(&self, r: &CampaignRecord) -> GroupKey {
        let campaign = Some(r.campaign_label().to_string());
        match self {
            Self::Date => GroupKey {
                date: Some(r.date),
                ..Default::default()
            },
            Self::Campaign => GroupKey {
                campaign,
                ..Default::default()
            },
            Self::DateCampaign => GroupKey {
                date: Some(r.date),
                campaign,
                ..Default::default()
            },
            Self::Account => GroupKey {
                account: r.account().map(str::to_string),
                ..Default::default()
            },
            Self::Detail => {
                let (ad_set, ad) = match (r.ad_set(), r.ad()) {
                    (ad_set, Some(ad)) => (ad_set.map(str::to_string), Some(ad.to_string())),
                    (Some(ad_set), None) => (Some(ad_set.to_string()), None),
                    (None, None) => (None, None),
                };
                GroupKey {
                    date: Some(r.date),
                    campaign,
                    ad_set,
                    ad,
                    account: None,
                }
            }
        }
    }
}

impl std::str::FromStr for Grouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "date" => Ok(Self::Date),
            "campaign" => Ok(Self::Campaign),
            "date_campaign" => Ok(Self::DateCampaign),
            "account" => Ok(Self::Account),
            "detail" => Ok(Self::Detail),
            other => Err(format!("unknown grouping: {other}")),
        }
    }
}

/// Group by an arbitrary key. Rows come back in ascending key order.
pub fn aggregate_by<F>(records: &[CampaignRecord], key_fn: F) -> Vec<AggregateRow>
where
    F: Fn(&CampaignRecord) -> GroupKey,
{
    let mut groups: BTreeMap<GroupKey, (Counters, usize)> = BTreeMap::new();
    for r in records {
        let (counters, count) = groups.entry(key_fn(r)).or_default();
        counters.add_record(r);
        *count += 1;
    }
    groups
        .into_iter()
        .map(|(key, (counters, count))| AggregateRow::new(key, counters, count))
        .collect()
}

pub fn aggregate(records: &[CampaignRecord], grouping: Grouping, order: RowOrder) -> Vec<AggregateRow> {
    let mut rows = aggregate_by(records, |r| grouping.key_for(r));
    sort_rows(&mut rows, order);
    rows
}

fn tie_break(a: &GroupKey, b: &GroupKey) -> Ordering {
    a.ad_set
        .cmp(&b.ad_set)
        .then_with(|| a.ad.cmp(&b.ad))
        .then_with(|| a.account.cmp(&b.account))
}

pub fn sort_rows(rows: &mut [AggregateRow], order: RowOrder) {
    match order {
        RowOrder::DateDesc => rows.sort_by(|a, b| {
            b.key
                .date
                .cmp(&a.key.date)
                .then_with(|| a.key.campaign.cmp(&b.key.campaign))
                .then_with(|| tie_break(&a.key, &b.key))
        }),
        RowOrder::CampaignAsc => rows.sort_by(|a, b| {
            a.key
                .campaign
                .cmp(&b.key.campaign)
                .then_with(|| tie_break(&a.key, &b.key))
                .then_with(|| b.key.date.cmp(&a.key.date))
        }),
    }
}

pub fn summarize(records: &[CampaignRecord]) -> SummaryTotals {
    let counters = Counters::from_records(records);
    let campaigns: BTreeSet<&str> = records.iter().map(|r| r.campaign_label()).collect();
    SummaryTotals {
        metrics: counters.derive(),
        counters,
        record_count: records.len(),
        campaign_count: campaigns.len(),
        first_date: records.iter().map(|r| r.date).min(),
        last_date: records.iter().map(|r| r.date).max(),
    }
}

/// Time series bucketed by `granularity`, oldest bucket first.
pub fn trend(records: &[CampaignRecord], granularity: Granularity) -> Vec<TrendPoint> {
    let mut buckets: BTreeMap<NaiveDate, Counters> = BTreeMap::new();
    for r in records {
        buckets
            .entry(granularity.bucket_start(r.date))
            .or_default()
            .add_record(r);
    }
    buckets
        .into_iter()
        .map(|(period_start, counters)| TrendPoint {
            period_start,
            metrics: counters.derive(),
            counters,
        })
        .collect()
}

/// Accounts present in the record set, sorted by id. Records without an
/// account id are not attributed to any account.
pub fn account_overview(records: &[CampaignRecord]) -> Vec<AccountInfo> {
    let mut accounts: BTreeMap<&str, AccountInfo> = BTreeMap::new();
    for r in records {
        let Some(id) = r.account() else { continue };
        let info = accounts.entry(id).or_insert_with(|| AccountInfo {
            account_id: id.to_string(),
            name: String::new(),
            record_count: 0,
            latest_date: None,
        });
        info.record_count += 1;
        info.latest_date = info.latest_date.max(Some(r.date));
        if info.name.is_empty() {
            if let Some(name) = r.account_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                info.name = name.to_string();
            }
        }
    }
    accounts
        .into_values()
        .map(|mut info| {
            if info.name.is_empty() {
                info.name = info.account_id.clone();
            }
            info
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    Cost,
    Conversions,
    Value,
    Roas,
}

impl RankMetric {
    fn value_of(&self, row: &AggregateRow) -> f64 {
        match self {
            Self::Cost => row.counters.cost,
            Self::Conversions => row.counters.conversions,
            Self::Value => row.counters.conversion_value,
            Self::Roas => row.metrics.roas,
        }
    }
}

/// Top `n` campaigns by `metric`, highest first; ties by campaign name.
pub fn rank_campaigns(records: &[CampaignRecord], metric: RankMetric, n: usize) -> Vec<AggregateRow> {
    let mut rows = aggregate_by(records, |r| Grouping::Campaign.key_for(r));
    rows.sort_by(|a, b| {
        metric
            .value_of(b)
            .total_cmp(&metric.value_of(a))
            .then_with(|| a.key.campaign.cmp(&b.key.campaign))
    });
    rows.truncate(n);
    rows
}

/// Rows and totals computed from one filtered record set, so a table and
/// its summary card can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub filter: RecordFilter,
    pub grouping: Grouping,
    pub rows: Vec<AggregateRow>,
    pub summary: SummaryTotals,
}

/// Shared entry point used by every reporting view.
#[derive(Debug, Clone)]
pub struct Aggregator {
    default_order: RowOrder,
    top_n: usize,
}

impl Aggregator {
    pub fn new(default_order: RowOrder, top_n: usize) -> Self {
        Self {
            default_order,
            top_n,
        }
    }

    pub fn from_config(config: &ReportingConfig) -> Self {
        Self::new(config.default_order, config.top_n)
    }

    pub fn rows(&self, records: &[CampaignRecord], grouping: Grouping) -> Vec<AggregateRow> {
        aggregate(records, grouping, self.default_order)
    }

    /// Campaign-level rows across all accounts, ordered by campaign name.
    pub fn campaign_rows(&self, records: &[CampaignRecord]) -> Vec<AggregateRow> {
        aggregate(records, Grouping::Campaign, RowOrder::CampaignAsc)
    }

    pub fn report(
        &self,
        records: &[CampaignRecord],
        filter: &RecordFilter,
        grouping: Grouping,
        order: Option<RowOrder>,
    ) -> Report {
        let filtered = filter.apply(records);
        Report {
            filter: filter.clone(),
            grouping,
            rows: aggregate(&filtered, grouping, order.unwrap_or(self.default_order)),
            summary: summarize(&filtered),
        }
    }

    pub fn summary(&self, records: &[CampaignRecord], filter: &RecordFilter) -> SummaryTotals {
        summarize(&filter.apply(records))
    }

    pub fn trend(
        &self,
        records: &[CampaignRecord],
        filter: &RecordFilter,
        granularity: Granularity,
    ) -> Vec<TrendPoint> {
        trend(&filter.apply(records), granularity)
    }

    pub fn accounts(&self, records: &[CampaignRecord]) -> Vec<AccountInfo> {
        account_overview(records)
    }

    pub fn top_campaigns(&self, records: &[CampaignRecord], metric: RankMetric) -> Vec<AggregateRow> {
        rank_campaigns(records, metric, self.top_n)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::from_config(&ReportingConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use campaign_core::metrics;
    use campaign_core::types::UNKNOWN_CAMPAIGN;

    const EPS: f64 = 1e-9;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn rec(date: u32, campaign: &str, impressions: u64, clicks: u64, cost: f64) -> CampaignRecord {
        CampaignRecord {
            id: format!("{campaign}-{date}-{impressions}"),
            date: day(date),
            campaign_name: campaign.into(),
            impressions,
            clicks,
            cost,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(&[], Grouping::Detail, RowOrder::DateDesc).is_empty());
        assert!(trend(&[], Granularity::Week).is_empty());
        assert!(account_overview(&[]).is_empty());
        let s = summarize(&[]);
        assert_eq!(s.record_count, 0);
        assert_eq!(s.first_date, None);
    }

    #[test]
    fn test_ratio_of_sums_not_average_of_ratios() {
        // 10 000 impressions at 1% CTR and 100 impressions at 50% CTR.
        let records = vec![rec(1, "Brand", 10_000, 100, 0.0), rec(1, "Brand", 100, 50, 0.0)];
        let rows = aggregate(&records, Grouping::Campaign, RowOrder::CampaignAsc);
        assert_eq!(rows.len(), 1);

        let pooled = rows[0].metrics.ctr;
        let averaged = (metrics::ctr(10_000, 100) + metrics::ctr(100, 50)) / 2.0;
        assert!((pooled - 150.0 / 10_100.0 * 100.0).abs() < EPS);
        assert!((pooled - averaged).abs() > 1.0);
    }

    #[test]
    fn test_detail_grouping_rule() {
        let mut with_ad = rec(1, "Brand", 100, 1, 1.0);
        with_ad.ad_set_name = Some("Set A".into());
        with_ad.ad_name = Some("Ad 1".into());
        let mut with_set = rec(1, "Brand", 100, 1, 1.0);
        with_set.ad_set_name = Some("Set A".into());
        let plain = rec(1, "Brand", 100, 1, 1.0);

        let k1 = Grouping::Detail.key_for(&with_ad);
        assert_eq!(k1.ad_set.as_deref(), Some("Set A"));
        assert_eq!(k1.ad.as_deref(), Some("Ad 1"));
        let k2 = Grouping::Detail.key_for(&with_set);
        assert_eq!(k2.ad_set.as_deref(), Some("Set A"));
        assert_eq!(k2.ad, None);
        let k3 = Grouping::Detail.key_for(&plain);
        assert_eq!((k3.ad_set, k3.ad), (None, None));

        let rows = aggregate(&[with_ad, with_set, plain], Grouping::Detail, RowOrder::DateDesc);
        assert_eq!(rows.len(), 3);
        // Same date and campaign: tie broken by ad-set then ad, None first.
        assert_eq!(rows[0].key.ad_set, None);
        assert_eq!(rows[1].key.ad, None);
        assert_eq!(rows[2].key.ad.as_deref(), Some("Ad 1"));
    }

    #[test]
    fn test_blank_campaign_uses_sentinel() {
        let records = vec![rec(1, "", 10, 1, 1.0), rec(2, "  ", 10, 1, 1.0)];
        let rows = aggregate(&records, Grouping::Campaign, RowOrder::CampaignAsc);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.campaign.as_deref(), Some(UNKNOWN_CAMPAIGN));
        assert_eq!(rows[0].record_count, 2);
    }

    #[test]
    fn test_orderings() {
        let records = vec![
            rec(1, "Zeta", 10, 1, 1.0),
            rec(3, "Alpha", 10, 1, 1.0),
            rec(2, "Mid", 10, 1, 1.0),
            rec(3, "Beta", 10, 1, 1.0),
        ];
        let by_date = aggregate(&records, Grouping::DateCampaign, RowOrder::DateDesc);
        let dates: Vec<_> = by_date.iter().map(|r| r.key.date.unwrap()).collect();
        assert_eq!(dates, vec![day(3), day(3), day(2), day(1)]);
        assert_eq!(by_date[0].key.campaign.as_deref(), Some("Alpha"));
        assert_eq!(by_date[1].key.campaign.as_deref(), Some("Beta"));

        let by_campaign = aggregate(&records, Grouping::Campaign, RowOrder::CampaignAsc);
        let names: Vec<_> = by_campaign
            .iter()
            .map(|r| r.key.campaign.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["Alpha", "Beta", "Mid", "Zeta"]);
    }

    #[test]
    fn test_summary_matches_rows() {
        let records = vec![
            rec(1, "Brand", 1_000, 10, 20.0),
            rec(2, "Promo", 3_000, 60, 80.0),
            rec(5, "Brand", 500, 5, 5.0),
        ];
        let agg = Aggregator::default();
        let report = agg.report(&records, &RecordFilter::new(), Grouping::Campaign, None);
        let row_cost: f64 = report.rows.iter().map(|r| r.counters.cost).sum();
        assert!((report.summary.counters.cost - row_cost).abs() < EPS);
        assert_eq!(report.summary.campaign_count, 2);
        assert_eq!(report.summary.first_date, Some(day(1)));
        assert_eq!(report.summary.last_date, Some(day(5)));
        assert!((report.summary.metrics.ctr - 75.0 / 4_500.0 * 100.0).abs() < EPS);
    }

    #[test]
    fn test_trend_weekly_buckets() {
        // 2024-03-04 is a Monday.
        let records = vec![
            rec(4, "A", 100, 1, 1.0),
            rec(10, "A", 100, 1, 1.0),
            rec(11, "A", 100, 1, 1.0),
        ];
        let points = trend(&records, Granularity::Week);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].period_start, day(4));
        assert_eq!(points[0].counters.impressions, 200);
        assert_eq!(points[1].period_start, day(11));
    }

    #[test]
    fn test_account_overview() {
        let mut a = rec(1, "A", 1, 0, 0.0);
        a.account_id = Some("acct-2".into());
        let mut b = rec(7, "A", 1, 0, 0.0);
        b.account_id = Some("acct-2".into());
        b.account_name = Some("Retail".into());
        let mut c = rec(3, "B", 1, 0, 0.0);
        c.account_id = Some("acct-1".into());
        let orphan = rec(9, "C", 1, 0, 0.0);

        let accounts = account_overview(&[a, b, c, orphan]);
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].account_id, "acct-1");
        assert_eq!(accounts[0].name, "acct-1");
        assert_eq!(accounts[1].name, "Retail");
        assert_eq!(accounts[1].record_count, 2);
        assert_eq!(accounts[1].latest_date, Some(day(7)));
    }

    #[test]
    fn test_rank_campaigns() {
        let records = vec![
            rec(1, "Small", 10, 1, 5.0),
            rec(1, "Large", 10, 1, 500.0),
            rec(2, "Large", 10, 1, 100.0),
            rec(1, "Mid", 10, 1, 50.0),
        ];
        let top = rank_campaigns(&records, RankMetric::Cost, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key.campaign.as_deref(), Some("Large"));
        assert!((top[0].counters.cost - 600.0).abs() < EPS);
        assert_eq!(top[1].key.campaign.as_deref(), Some("Mid"));
    }

    #[test]
    fn test_aggregate_by_custom_key() {
        let records = vec![rec(1, "A", 10, 1, 1.0), rec(2, "B", 30, 3, 3.0)];
        let rows = aggregate_by(&records, |_| GroupKey::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].counters.impressions, 40);
    }
}
