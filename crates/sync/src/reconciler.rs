//! Source reconciler.
//!
//! Keeps four slices (records, summary, trends, accounts) consistent with
//! the current selection. Each refresh snapshots the selection, fetches
//! (records and accounts go through the TTL cache first), and applies the
//! result only if the selection still has the same scope for that slice.
//! A selection change while a fetch is in flight cancels the fetch.

use crate::selection::{Selection, SliceKind};
use crate::slice::{self, Origin, Slice, SliceOutcome};
use crate::source::{FetchError, RemoteSource};
use campaign_cache::{keys, CacheLayer};
use campaign_core::event_bus::{SyncBus, SyncEvent, WeakSyncBus};
use campaign_core::types::{AccountInfo, CampaignRecord, SummaryTotals, TrendPoint};
use campaign_reporting::aggregate;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Own event ids remembered for the listener; matches the bus capacity, past
/// which a listener would have lagged anyway.
const MAX_OWN_EVENTS: usize = 64;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Slices {
    pub records: Slice<Vec<CampaignRecord>>,
    pub summary: Slice<SummaryTotals>,
    pub trends: Slice<Vec<TrendPoint>>,
    pub accounts: Slice<Vec<AccountInfo>>,
}

impl Slices {
    fn reset_changed(&mut self, old: &Selection, new: &Selection) {
        if old.scope(SliceKind::Records) != new.scope(SliceKind::Records) {
            self.records.reset();
        }
        if old.scope(SliceKind::Summary) != new.scope(SliceKind::Summary) {
            self.summary.reset();
        }
        if old.scope(SliceKind::Trends) != new.scope(SliceKind::Trends) {
            self.trends.reset();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub records: SliceOutcome,
    pub summary: SliceOutcome,
    pub trends: SliceOutcome,
    pub accounts: SliceOutcome,
}

pub struct Reconciler {
    source: Arc<dyn RemoteSource>,
    cache: Arc<CacheLayer>,
    selection: watch::Sender<Selection>,
    slices: Mutex<Slices>,
    fallback: Mutex<Option<Vec<CampaignRecord>>>,
    bus: Option<WeakSyncBus>,
    /// Sync events this reconciler published itself; its own listener skips them.
    published: Mutex<VecDeque<Uuid>>,
}

impl Reconciler {
    pub fn new(source: Arc<dyn RemoteSource>, cache: Arc<CacheLayer>) -> Self {
        let (selection, _) = watch::channel(Selection::default());
        Self {
            source,
            cache,
            selection,
            slices: Mutex::new(Slices::default()),
            fallback: Mutex::new(None),
            bus: None,
            published: Mutex::new(VecDeque::new()),
        }
    }

    /// Publish resyncs on `bus`. Only a weak handle is kept, so the caller's
    /// `SyncBus` decides how long the channel lives.
    pub fn with_bus(mut self, bus: &SyncBus) -> Self {
        self.bus = Some(bus.downgrade());
        self
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn selection(&self) -> Selection {
        self.selection.borrow().clone()
    }

    /// Watch the selection; every [`Self::select`] is observed here.
    pub fn subscribe_selection(&self) -> watch::Receiver<Selection> {
        self.selection.subscribe()
    }

    /// Switch selection. Slices whose scope changed are emptied so no view
    /// shows data loaded for another scope; in-flight fetches for those
    /// slices are cancelled.
    pub fn select(&self, selection: Selection) {
        let mut slices = self.slices.lock();
        let old = self.selection.send_replace(selection.clone());
        if old != selection {
            slices.reset_changed(&old, &selection);
            debug!(
                account_id = selection.account().unwrap_or("*"),
                "Selection changed"
            );
        }
    }

    /// Snapshot used when an unfiltered fetch fails with nothing to keep.
    pub fn set_fallback(&self, records: Option<Vec<CampaignRecord>>) {
        *self.fallback.lock() = records;
    }

    pub fn snapshot(&self) -> Slices {
        self.slices.lock().clone()
    }

    pub fn records(&self) -> Slice<Vec<CampaignRecord>> {
        self.slices.lock().records.clone()
    }

    pub fn summary(&self) -> Slice<SummaryTotals> {
        self.slices.lock().summary.clone()
    }

    pub fn trends(&self) -> Slice<Vec<TrendPoint>> {
        self.slices.lock().trends.clone()
    }

    pub fn accounts(&self) -> Slice<Vec<AccountInfo>> {
        self.slices.lock().accounts.clone()
    }

    /// Fallback records restricted to `selection`'s scope for `kind`.
    fn fallback_for(&self, selection: &Selection, kind: SliceKind) -> Option<Vec<CampaignRecord>> {
        let fallback = self.fallback.lock();
        let records = fallback.as_ref()?;
        let scope = selection.scope(kind);
        Some(scope.record_filter().apply(records))
    }

    // ─── Fetch plumbing ─────────────────────────────────────────────────────

    /// Run `fetch` unless the selection scope for `kind` changes first.
    /// Returns `None` when cancelled.
    async fn guarded<T, F>(&self, kind: SliceKind, requested: &Selection, fetch: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let mut rx = self.subscribe_selection();
        let scope = requested.scope(kind);
        tokio::pin!(fetch);
        loop {
            tokio::select! {
                out = &mut fetch => return Some(out),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Some(fetch.await);
                    }
                    if rx.borrow_and_update().scope(kind) != scope {
                        return None;
                    }
                }
            }
        }
    }

    fn record_fetch<T>(kind: SliceKind, result: &Result<T, FetchError>) {
        match result {
            Ok(_) => metrics::counter!("sync.fetch.ok").increment(1),
            Err(e) => {
                metrics::counter!("sync.fetch.failed").increment(1);
                warn!(slice = kind.as_str(), error = %e, "Remote fetch failed");
            }
        }
    }

    fn stale(kind: SliceKind) -> SliceOutcome {
        metrics::counter!("sync.fetch.stale").increment(1);
        debug!(slice = kind.as_str(), "Selection moved on, result discarded");
        SliceOutcome::Stale
    }

    async fn cache_store<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.cache.set(key, value).await {
            warn!(key = key, error = %e, "Failed to cache fetch result");
        }
    }

    /// Apply `result` to the slice picked by `pick`, provided the selection
    /// still matches `requested` for `kind`. The check and the write happen
    /// under the slice lock, which [`Self::select`] also takes.
    fn commit<T: Default>(
        &self,
        kind: SliceKind,
        requested: &Selection,
        result: Result<T, FetchError>,
        fallback: impl FnOnce() -> Option<T>,
        pick: impl FnOnce(&mut Slices) -> &mut Slice<T>,
    ) -> SliceOutcome {
        let mut slices = self.slices.lock();
        let scope = requested.scope(kind);
        if self.selection.borrow().scope(kind) != scope {
            return Self::stale(kind);
        }
        let outcome = slice::apply(
            pick(&mut *slices),
            scope,
            result,
            requested.is_dimension_filtered(kind),
            fallback,
            self.cache.now(),
        );
        debug!(slice = kind.as_str(), outcome = ?outcome, "Slice updated");
        outcome
    }

    /// Cache hit path shared by records and accounts.
    async fn from_cache<T: DeserializeOwned + Default>(
        &self,
        kind: SliceKind,
        requested: &Selection,
        key: &str,
        pick: impl FnOnce(&mut Slices) -> &mut Slice<T>,
    ) -> Option<SliceOutcome> {
        let entry = self.cache.get_entry::<T>(key).await?;
        let mut slices = self.slices.lock();
        let scope = requested.scope(kind);
        if self.selection.borrow().scope(kind) != scope {
            return Some(Self::stale(kind));
        }
        let slice = pick(&mut *slices);
        slice.store(entry.payload, Origin::Cache, scope, entry.fetched_at);
        slice.last_error = None;
        Some(SliceOutcome::Applied(Origin::Cache))
    }

    // ─── Slice refreshes ────────────────────────────────────────────────────

    pub async fn refresh_records(&self) -> SliceOutcome {
        let kind = SliceKind::Records;
        let requested = self.selection();
        let key = keys::records_for(requested.account());

        if let Some(outcome) = self
            .from_cache(kind, &requested, &key, |s| &mut s.records)
            .await
        {
            return outcome;
        }

        let Some(result) = self
            .guarded(kind, &requested, self.source.fetch_records(requested.account()))
            .await
        else {
            return Self::stale(kind);
        };
        Self::record_fetch(kind, &result);
        if let Ok(records) = &result {
            self.cache_store(&key, records).await;
        }
        self.commit(
            kind,
            &requested,
            result,
            || self.fallback_for(&requested, kind),
            |s| &mut s.records,
        )
    }

    pub async fn refresh_summary(&self) -> SliceOutcome {
        let kind = SliceKind::Summary;
        let requested = self.selection();

        let Some(result) = self
            .guarded(
                kind,
                &requested,
                self.source.fetch_summary(requested.range, requested.account()),
            )
            .await
        else {
            return Self::stale(kind);
        };
        Self::record_fetch(kind, &result);
        self.commit(
            kind,
            &requested,
            result,
            || {
                self.fallback_for(&requested, kind)
                    .map(|records| aggregate::summarize(&records))
            },
            |s| &mut s.summary,
        )
    }

    pub async fn refresh_trends(&self) -> SliceOutcome {
        let kind = SliceKind::Trends;
        let requested = self.selection();

        let Some(result) = self
            .guarded(
                kind,
                &requested,
                self.source
                    .fetch_trends(requested.range, requested.granularity, requested.account()),
            )
            .await
        else {
            return Self::stale(kind);
        };
        Self::record_fetch(kind, &result);
        self.commit(
            kind,
            &requested,
            result,
            || {
                self.fallback_for(&requested, kind)
                    .map(|records| aggregate::trend(&records, requested.granularity))
            },
            |s| &mut s.trends,
        )
    }

    pub async fn refresh_accounts(&self) -> SliceOutcome {
        let kind = SliceKind::Accounts;
        let requested = self.selection();

        if let Some(outcome) = self
            .from_cache(kind, &requested, keys::ACCOUNTS, |s| &mut s.accounts)
            .await
        {
            return outcome;
        }

        // The account list does not depend on the selection, so it is never
        // cancelled.
        let result = self.source.fetch_accounts().await;
        Self::record_fetch(kind, &result);
        if let Ok(accounts) = &result {
            self.cache_store(keys::ACCOUNTS, accounts).await;
        }
        self.commit(
            kind,
            &requested,
            result,
            || {
                self.fallback_for(&requested, kind)
                    .map(|records| aggregate::account_overview(&records))
            },
            |s| &mut s.accounts,
        )
    }

    /// Refresh every slice concurrently.
    pub async fn refresh_all(&self) -> RefreshReport {
        let (records, summary, trends, accounts) = tokio::join!(
            self.refresh_records(),
            self.refresh_summary(),
            self.refresh_trends(),
            self.refresh_accounts(),
        );
        let report = RefreshReport {
            records,
            summary,
            trends,
            accounts,
        };
        info!(report = ?report, "Refresh complete");
        report
    }

    // ─── Data sync ──────────────────────────────────────────────────────────

    /// Manual resync: drop the cache, refetch everything, then tell other
    /// consumers on the bus that the remote record set changed.
    pub async fn resync(&self) -> RefreshReport {
        let dropped = self.cache.invalidate_all().await;
        info!(keys = dropped.len(), "Resync started, cache invalidated");
        let report = self.refresh_all().await;
        if let Some(bus) = self.bus.as_ref().and_then(WeakSyncBus::upgrade) {
            let event = SyncEvent::data_sync_complete(self.selection().account_id);
            if let SyncEvent::DataSyncComplete { event_id, .. } = &event {
                let mut published = self.published.lock();
                if published.len() == MAX_OWN_EVENTS {
                    published.pop_front();
                }
                published.push_back(*event_id);
            }
            bus.publish(event);
        }
        report
    }

    fn is_own_event(&self, event_id: &Uuid) -> bool {
        let mut published = self.published.lock();
        match published.iter().position(|id| id == event_id) {
            Some(pos) => {
                published.remove(pos);
                true
            }
            None => false,
        }
    }

    /// React to `DataSyncComplete` from other producers by invalidating the
    /// cache and refreshing. Ends once every `SyncBus` handle is dropped; the
    /// reconciler itself only holds a weak one.
    pub fn spawn_sync_listener(self: Arc<Self>, bus: &SyncBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SyncEvent::DataSyncComplete { event_id, .. }) => {
                        if self.is_own_event(&event_id) {
                            continue;
                        }
                        self.cache.invalidate_all().await;
                        info!(event_id = %event_id, "External data sync, refreshing");
                        self.refresh_all().await;
                    }
                    Ok(SyncEvent::CacheInvalidated { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Reconciler lagged on sync bus, refreshing");
                        self.cache.invalidate_all().await;
                        self.refresh_all().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
