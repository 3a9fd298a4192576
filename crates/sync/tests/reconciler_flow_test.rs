//! End-to-end reconciler flows against an in-memory remote source:
//! late responses, failure handling per filter state, cache expiry, and
//! data sync events.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use campaign_cache::{CacheLayer, ManualClock, MemoryStore};
    use campaign_core::event_bus::{SyncBus, SyncEvent};
    use campaign_core::types::{CampaignRecord, Granularity};
    use campaign_sync::{
        Endpoint, LoadState, MemorySource, Origin, Reconciler, Selection, SliceOutcome,
    };
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use std::sync::Arc;

    fn record(account: &str, day: u32, cost: f64, conversions: f64) -> CampaignRecord {
        CampaignRecord {
            id: format!("{account}-{day}"),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            campaign_name: format!("{account} prospecting"),
            account_id: Some(account.to_string()),
            account_name: Some(format!("Account {account}")),
            impressions: 10_000,
            clicks: 200,
            cost,
            conversions,
            conversion_value: conversions * 40.0,
            ..Default::default()
        }
    }

    fn sample_records() -> Vec<CampaignRecord> {
        vec![
            record("a", 1, 100.0, 5.0),
            record("a", 2, 150.0, 6.0),
            record("b", 1, 80.0, 2.0),
        ]
    }

    fn setup() -> (Arc<Reconciler>, Arc<MemorySource>) {
        let source = Arc::new(MemorySource::new(sample_records()));
        let cache = Arc::new(CacheLayer::in_memory(Duration::hours(24)));
        (Arc::new(Reconciler::new(source.clone(), cache)), source)
    }

    async fn wait_for_call(source: &MemorySource, endpoint: Endpoint, account: Option<&str>) {
        let wanted = (endpoint, account.map(str::to_string));
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !source.calls().contains(&wanted) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_late_response_for_previous_account_never_applied() {
        let (rec, source) = setup();
        source.hold(Endpoint::Records, Some("a"));
        rec.select(Selection::default().with_account("a"));

        let pending_a = tokio::spawn({
            let rec = rec.clone();
            async move { rec.refresh_records().await }
        });
        wait_for_call(&source, Endpoint::Records, Some("a")).await;

        rec.select(Selection::default().with_account("b"));
        let outcome_b = rec.refresh_records().await;
        source.release(Endpoint::Records, Some("a"));
        let outcome_a = pending_a.await.unwrap();

        assert_eq!(outcome_b, SliceOutcome::Applied(Origin::Remote));
        assert_eq!(outcome_a, SliceOutcome::Stale);

        let records = rec.records();
        assert_eq!(records.scope.unwrap().account_id.as_deref(), Some("b"));
        let data = records.data.unwrap();
        assert_eq!(data.len(), 1);
        assert!(data.iter().all(|r| r.account() == Some("b")));
    }

    #[tokio::test]
    async fn test_unrelated_selection_change_does_not_cancel() {
        let (rec, source) = setup();
        source.hold(Endpoint::Records, None);

        let pending = tokio::spawn({
            let rec = rec.clone();
            async move { rec.refresh_records().await }
        });
        wait_for_call(&source, Endpoint::Records, None).await;

        // Records ignore granularity, so the in-flight fetch stays relevant.
        rec.select(Selection::default().with_granularity(Granularity::Month));
        source.release(Endpoint::Records, None);

        assert_eq!(
            pending.await.unwrap(),
            SliceOutcome::Applied(Origin::Remote)
        );
        assert_eq!(rec.records().data.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_filtered_failure_clears_slice() {
        let (rec, source) = setup();
        rec.set_fallback(Some(sample_records()));
        rec.select(Selection::default().with_account("a"));
        rec.refresh_all().await;
        assert_eq!(rec.summary().data.unwrap().counters.cost, 250.0);

        rec.cache().invalidate_all().await;
        source.set_failing(Endpoint::Records, true);
        source.set_failing(Endpoint::Summary, true);
        let report = rec.refresh_all().await;

        assert_eq!(report.records, SliceOutcome::Cleared);
        assert_eq!(report.summary, SliceOutcome::Cleared);
        let records = rec.records();
        assert_eq!(records.state(), LoadState::Loaded);
        assert_eq!(records.origin, Some(Origin::Empty));
        assert!(records.data.unwrap().is_empty());
        assert!(records.last_error.is_some());
        assert_eq!(rec.summary().data.unwrap().record_count, 0);
    }

    #[tokio::test]
    async fn test_unfiltered_failure_keeps_prior() {
        let (rec, source) = setup();
        rec.refresh_all().await;

        rec.cache().invalidate_all().await;
        source.set_failing(Endpoint::Records, true);
        source.set_failing(Endpoint::Summary, true);
        let report = rec.refresh_all().await;

        assert_eq!(report.records, SliceOutcome::KeptPrior);
        assert_eq!(report.summary, SliceOutcome::KeptPrior);
        let records = rec.records();
        assert_eq!(records.origin, Some(Origin::Remote));
        assert_eq!(records.data.unwrap().len(), 3);
        assert!(records.last_error.is_some());
        assert_eq!(rec.summary().data.unwrap().counters.cost, 330.0);
    }

    #[tokio::test]
    async fn test_fallback_used_only_when_unfiltered() {
        let (rec, source) = setup();
        source.set_failing(Endpoint::Summary, true);
        source.set_failing(Endpoint::Trends, true);
        rec.set_fallback(Some(vec![record("a", 3, 60.0, 3.0)]));

        assert_eq!(
            rec.refresh_summary().await,
            SliceOutcome::Applied(Origin::Fallback)
        );
        let summary = rec.summary().data.unwrap();
        assert_eq!(summary.counters.cost, 60.0);
        assert_eq!(summary.metrics.cpa, 20.0);
        assert_eq!(
            rec.refresh_trends().await,
            SliceOutcome::Applied(Origin::Fallback)
        );

        rec.select(Selection::default().with_account("a"));
        assert_eq!(rec.refresh_summary().await, SliceOutcome::Cleared);
        assert_eq!(rec.summary().origin, Some(Origin::Empty));
    }

    #[tokio::test]
    async fn test_unfiltered_failure_without_fallback_is_empty() {
        let (rec, source) = setup();
        source.set_failing(Endpoint::Trends, true);
        assert_eq!(
            rec.refresh_trends().await,
            SliceOutcome::Applied(Origin::Empty)
        );
        assert!(rec.trends().data.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let source = Arc::new(MemorySource::new(sample_records()));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap(),
        ));
        let cache = Arc::new(CacheLayer::with_clock(
            Arc::new(MemoryStore::default()),
            Duration::hours(24),
            clock.clone(),
        ));
        let rec = Reconciler::new(source.clone(), cache);

        assert_eq!(rec.refresh_accounts().await, SliceOutcome::Applied(Origin::Remote));
        clock.advance(Duration::hours(23));
        assert_eq!(rec.refresh_accounts().await, SliceOutcome::Applied(Origin::Cache));
        clock.advance(Duration::hours(1));
        assert_eq!(rec.refresh_accounts().await, SliceOutcome::Applied(Origin::Remote));

        let account_calls = source
            .calls()
            .into_iter()
            .filter(|(e, _)| *e == Endpoint::Accounts)
            .count();
        assert_eq!(account_calls, 2);
        let accounts = rec.accounts().data.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].name, "Account a");
    }

    #[tokio::test]
    async fn test_filtered_records_cached_per_account() {
        let (rec, source) = setup();
        rec.select(Selection::default().with_account("a"));
        rec.refresh_records().await;
        rec.select(Selection::default().with_account("b"));
        rec.refresh_records().await;
        rec.select(Selection::default().with_account("a"));
        assert_eq!(
            rec.refresh_records().await,
            SliceOutcome::Applied(Origin::Cache)
        );
        assert_eq!(rec.records().data.unwrap().len(), 2);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_external_sync_event_triggers_refresh() {
        let bus = SyncBus::new();
        let (rec, source) = setup();
        rec.refresh_all().await;
        let _listener = rec.clone().spawn_sync_listener(&bus);

        let mut updated = sample_records();
        updated.push(record("b", 2, 20.0, 1.0));
        source.replace_records(updated);
        bus.publish(SyncEvent::data_sync_complete(None));

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while rec.records().data.map(|d| d.len()) != Some(4) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(rec.summary().data.unwrap().counters.cost, 350.0);
    }
}
