//! Remote data sources consumed by the reconciler.
//!
//! The analytics API itself lives elsewhere; this crate only depends on the
//! [`RemoteSource`] contract. Two implementations ship here: a JSON export
//! reader for offline use and an in-memory source with failure injection
//! and hold points for tests.

use async_trait::async_trait;
use campaign_core::types::{AccountInfo, CampaignRecord, Granularity, SummaryTotals, TrendPoint};
use campaign_reporting::aggregate;
use campaign_reporting::filter::{DateRange, RecordFilter};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Remote source unavailable: {0}")]
    Unavailable(String),

    #[error("Remote response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Remote IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FetchError> for campaign_core::InsightsError {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e.to_string())
    }
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_records(&self, account_id: Option<&str>) -> Result<Vec<CampaignRecord>, FetchError>;

    async fn fetch_summary(
        &self,
        range: DateRange,
        account_id: Option<&str>,
    ) -> Result<SummaryTotals, FetchError>;

    async fn fetch_trends(
        &self,
        range: DateRange,
        granularity: Granularity,
        account_id: Option<&str>,
    ) -> Result<Vec<TrendPoint>, FetchError>;

    async fn fetch_accounts(&self) -> Result<Vec<AccountInfo>, FetchError>;
}

fn scoped(range: DateRange, account_id: Option<&str>) -> RecordFilter {
    RecordFilter {
        date_range: range,
        account_id: account_id.map(str::to_string),
        campaign: None,
    }
}

// ─── JSON export source ─────────────────────────────────────────────────────

/// Rows stay raw here so one malformed record cannot sink the whole export.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExportFile {
    Bare(Vec<serde_json::Value>),
    Wrapped { records: Vec<serde_json::Value> },
}

/// Decode rows one at a time, skipping the ones that cannot become a record
/// (typically a missing or unparseable date). Returns the records and the
/// number of rows skipped.
fn decode_rows(rows: Vec<serde_json::Value>) -> (Vec<CampaignRecord>, usize) {
    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for (index, row) in rows.into_iter().enumerate() {
        match serde_json::from_value::<CampaignRecord>(row) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(row = index, error = %e, "Skipping malformed record");
            }
        }
    }
    if skipped > 0 {
        metrics::counter!("sync.records.skipped").increment(skipped as u64);
    }
    (records, skipped)
}

/// Serves a JSON export of records (either a bare array or
/// `{"records": [...]}`) as if it were the remote API.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<CampaignRecord>, FetchError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let rows = match serde_json::from_str::<ExportFile>(&raw)? {
            ExportFile::Bare(rows) => rows,
            ExportFile::Wrapped { records } => records,
        };
        let (records, skipped) = decode_rows(rows);
        debug!(
            path = %self.path.display(),
            records = records.len(),
            skipped = skipped,
            "Record export loaded"
        );
        Ok(records)
    }
}

#[async_trait]
impl RemoteSource for JsonFileSource {
    async fn fetch_records(&self, account_id: Option<&str>) -> Result<Vec<CampaignRecord>, FetchError> {
        let records = self.load().await?;
        Ok(scoped(DateRange::unbounded(), account_id).apply(&records))
    }

    async fn fetch_summary(
        &self,
        range: DateRange,
        account_id: Option<&str>,
    ) -> Result<SummaryTotals, FetchError> {
        let records = self.load().await?;
        Ok(aggregate::summarize(&scoped(range, account_id).apply(&records)))
    }

    async fn fetch_trends(
        &self,
        range: DateRange,
        granularity: Granularity,
        account_id: Option<&str>,
    ) -> Result<Vec<TrendPoint>, FetchError> {
        let records = self.load().await?;
        Ok(aggregate::trend(&scoped(range, account_id).apply(&records), granularity))
    }

    async fn fetch_accounts(&self) -> Result<Vec<AccountInfo>, FetchError> {
        let records = self.load().await?;
        Ok(aggregate::account_overview(&records))
    }
}

// ─── In-memory source ───────────────────────────────────────────────────────

/// Which remote call an injected failure or hold point applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Records,
    Summary,
    Trends,
    Accounts,
}

/// Remote source over an in-memory record set. Calls can be made to fail
/// or to wait until released, per endpoint and account.
#[derive(Default)]
pub struct MemorySource {
    records: Mutex<Vec<CampaignRecord>>,
    failing: Mutex<HashSet<Endpoint>>,
    holds: Mutex<HashMap<(Endpoint, Option<String>), Arc<Notify>>>,
    calls: Mutex<Vec<(Endpoint, Option<String>)>>,
}

impl MemorySource {
    pub fn new(records: Vec<CampaignRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn replace_records(&self, records: Vec<CampaignRecord>) {
        *self.records.lock() = records;
    }

    pub fn set_failing(&self, endpoint: Endpoint, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(endpoint);
        } else {
            set.remove(&endpoint);
        }
    }

    /// Make calls to `endpoint` for `account_id` wait until [`Self::release`].
    pub fn hold(&self, endpoint: Endpoint, account_id: Option<&str>) {
        self.holds
            .lock()
            .insert((endpoint, account_id.map(str::to_string)), Arc::new(Notify::new()));
    }

    pub fn release(&self, endpoint: Endpoint, account_id: Option<&str>) {
        if let Some(gate) = self.holds.lock().remove(&(endpoint, account_id.map(str::to_string))) {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<(Endpoint, Option<String>)> {
        self.calls.lock().clone()
    }

    async fn enter(&self, endpoint: Endpoint, account_id: Option<&str>) -> Result<Vec<CampaignRecord>, FetchError> {
        let key = (endpoint, account_id.map(str::to_string));
        self.calls.lock().push(key.clone());
        let gate = self.holds.lock().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing.lock().contains(&endpoint) {
            return Err(FetchError::Unavailable(format!("{endpoint:?} endpoint failing")));
        }
        Ok(self.records.lock().clone())
    }
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn fetch_records(&self, account_id: Option<&str>) -> Result<Vec<CampaignRecord>, FetchError> {
        let records = self.enter(Endpoint::Records, account_id).await?;
        Ok(scoped(DateRange::unbounded(), account_id).apply(&records))
    }

    async fn fetch_summary(
        &self,
        range: DateRange,
        account_id: Option<&str>,
    ) -> Result<SummaryTotals, FetchError> {
        let records = self.enter(Endpoint::Summary, account_id).await?;
        Ok(aggregate::summarize(&scoped(range, account_id).apply(&records)))
    }

    async fn fetch_trends(
        &self,
        range: DateRange,
        granularity: Granularity,
        account_id: Option<&str>,
    ) -> Result<Vec<TrendPoint>, FetchError> {
        let records = self.enter(Endpoint::Trends, account_id).await?;
        Ok(aggregate::trend(&scoped(range, account_id).apply(&records), granularity))
    }

    async fn fetch_accounts(&self) -> Result<Vec<AccountInfo>, FetchError> {
        let records = self.enter(Endpoint::Accounts, None).await?;
        Ok(aggregate::account_overview(&records))
    }
}
