//! Integration tests for the Incremental Updater against a real flat-file
//! store and a scripted history provider.
//!
//! Fixture: snapshots for 2025-01-01..=2025-02-09 holding three coins
//! (a > b > c by market cap). On 2025-02-10 the listing adds new entrants
//! whose histories reach back to 2025-01-01.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use coinindex_core::classification::{Classifier, Classify, CoinMetadata, StaticTaxonomy};
use coinindex_core::data::{
    Coverage, FetchError, HistoryCache, HistoryPoint, HistoryProvider, MarketListing,
};
use coinindex_core::domain::{BackfillState, CoinUniverse, DailySnapshot, MarketRow};
use coinindex_core::store::{FlatFileStore, SnapshotStore, StoreError};
use coinindex_runner::report::OperationKind;
use coinindex_runner::{
    IncrementalUpdater, OperationLog, UpdateError, UpdateOptions, UpdateStatus,
};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn days(start: &str, end: &str) -> Vec<NaiveDate> {
    let end = d(end);
    d(start).iter_days().take_while(|day| *day <= end).collect()
}

// ── Fixtures ─────────────────────────────────────────────────────────

struct ScriptedProvider {
    listings: Vec<MarketListing>,
    histories: HashMap<String, Result<Vec<HistoryPoint>, FetchError>>,
    history_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(listings: Vec<MarketListing>) -> Self {
        Self {
            listings,
            histories: HashMap::new(),
            history_calls: AtomicUsize::new(0),
        }
    }

    fn with_history(mut self, coin_id: &str, result: Result<Vec<HistoryPoint>, FetchError>) -> Self {
        self.histories.insert(coin_id.to_string(), result);
        self
    }

    fn calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

impl HistoryProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn top_markets(&self, k: usize) -> Result<Vec<MarketListing>, FetchError> {
        Ok(self.listings.iter().take(k).cloned().collect())
    }

    fn fetch_history(
        &self,
        coin_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, FetchError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.histories
            .get(coin_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::NotFound {
                    coin_id: coin_id.to_string(),
                })
            })
    }
}

fn listing(coin_id: &str, market_cap: f64, rank: u32) -> MarketListing {
    MarketListing {
        coin_id: coin_id.into(),
        symbol: coin_id.to_uppercase(),
        name: format!("{coin_id} coin"),
        price: 1.0,
        volume: 10.0,
        market_cap,
        rank,
    }
}

fn history(start: &str, end: &str, market_cap: f64) -> Vec<HistoryPoint> {
    days(start, end)
        .into_iter()
        .map(|date| HistoryPoint {
            date,
            price: 2.5,
            volume: 7.0,
            market_cap,
        })
        .collect()
}

fn row(coin_id: &str, market_cap: f64) -> MarketRow {
    MarketRow {
        coin_id: coin_id.into(),
        symbol: coin_id.to_uppercase(),
        price: 1.0,
        volume: 10.0,
        market_cap,
        rank: 0,
    }
}

/// Flat store with a/b/c snapshots for 2025-01-01..=2025-02-09.
fn seeded_store(root: &Path) -> Arc<FlatFileStore> {
    let store = FlatFileStore::new(root.join("daily"));
    for date in days("2025-01-01", "2025-02-09") {
        let snapshot = DailySnapshot::from_rows(
            date,
            vec![row("a", 300.0), row("b", 200.0), row("c", 100.0)],
        )
        .unwrap();
        store.write(&snapshot).unwrap();
    }
    Arc::new(store)
}

fn listings_with(extra: &[(&str, f64)]) -> Vec<MarketListing> {
    let mut all = vec![
        listing("a", 300.0, 1),
        listing("b", 200.0, 2),
        listing("c", 100.0, 3),
    ];
    for (i, (id, cap)) in extra.iter().enumerate() {
        all.push(listing(id, *cap, 4 + i as u32));
    }
    all
}

fn classifier() -> Arc<dyn Classify> {
    Arc::new(Classifier::new(StaticTaxonomy::new()))
}

fn opts() -> UpdateOptions {
    UpdateOptions::new(d("2025-02-10"))
}

fn snapshot_bytes(store: &FlatFileStore) -> Vec<Vec<u8>> {
    days("2025-01-01", "2025-02-09")
        .into_iter()
        .map(|date| std::fs::read(store.path_for(date)).unwrap())
        .collect()
}

// ── Back-merge ───────────────────────────────────────────────────────

#[test]
fn new_entrant_is_merged_into_every_overlapping_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();
    assert_eq!(universe.len(), 3);

    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("x", 250.0)]))
            .with_history("x", Ok(history("2025-01-01", "2025-02-10", 250.0))),
    );
    let updater = IncrementalUpdater::new(store.clone(), provider, classifier());
    let outcome = updater.run(universe, &opts()).unwrap();
    let report = &outcome.report;

    assert_eq!(report.status(), UpdateStatus::Complete);
    assert_eq!(report.new_entrants, vec!["x"]);
    assert_eq!(report.history_start, d("2025-01-01"));
    assert_eq!(report.merges.len(), 40);
    assert_eq!(report.rows_added(), 40);
    assert!(report.merges.iter().all(|m| m.written && m.row_count == 4));

    for date in days("2025-01-01", "2025-02-09") {
        let snap = store.read(date).unwrap();
        assert_eq!(snap.len(), 4, "{date}");
        assert!(snap.verify_ranks().is_ok(), "{date}");

        let x = snap.get("x").unwrap();
        assert_eq!(x.rank, 2);
        assert_eq!(x.price, 2.5);
        assert_eq!(x.market_cap, 250.0);

        // Existing rows keep their values; only ranks move.
        let a = snap.get("a").unwrap();
        assert_eq!((a.rank, a.price, a.market_cap), (1, 1.0, 300.0));
        assert_eq!(snap.get("b").unwrap().rank, 3);
        assert_eq!(snap.get("c").unwrap().rank, 4);
    }

    let x = outcome.universe.get("x").unwrap();
    assert_eq!(x.first_seen, d("2025-01-01"));
    assert_eq!(x.backfill, BackfillState::Complete);
    assert_eq!(x.name.as_deref(), Some("x coin"));
    assert_eq!(report.universe_size, 4);

    let entrant = &report.entrants[0];
    assert!(entrant.registered);
    assert_eq!(entrant.points, 41);
    assert_eq!(entrant.merged_dates.len(), 40);
    assert_eq!(entrant.classification, "native");
}

#[test]
fn history_outside_stored_dates_is_not_merged() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();

    // x only existed from 2025-02-01.
    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("x", 50.0)]))
            .with_history("x", Ok(history("2025-02-01", "2025-02-10", 50.0))),
    );
    let updater = IncrementalUpdater::new(store.clone(), provider, classifier());
    let outcome = updater.run(universe, &opts()).unwrap();

    assert_eq!(outcome.report.merges.len(), 9);
    assert!(!store.read(d("2025-01-31")).unwrap().contains("x"));
    assert_eq!(store.read(d("2025-02-01")).unwrap().get("x").unwrap().rank, 4);
    assert_eq!(outcome.universe.get("x").unwrap().first_seen, d("2025-02-01"));
}

// ── Partial success ──────────────────────────────────────────────────

#[test]
fn one_failed_entrant_does_not_abort_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();

    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("x", 250.0), ("y", 150.0), ("z", 50.0)]))
            .with_history("x", Ok(history("2025-01-01", "2025-02-10", 250.0)))
            .with_history(
                "y",
                Err(FetchError::Transient {
                    target: "y".into(),
                    reason: "HTTP 429".into(),
                }),
            ),
    );
    let updater = IncrementalUpdater::new(store.clone(), provider, classifier());
    let outcome = updater.run(universe, &opts()).unwrap();
    let report = &outcome.report;

    assert_eq!(report.status(), UpdateStatus::Partial);
    assert_eq!(report.backfill_failures.len(), 2);

    let transient = report
        .backfill_failures
        .iter()
        .find(|f| f.coin_id == "y")
        .unwrap();
    assert_eq!(transient.kind, "transient");
    assert!(transient.retryable);

    let missing = report
        .backfill_failures
        .iter()
        .find(|f| f.coin_id == "z")
        .unwrap();
    assert_eq!(missing.kind, "not_found");
    assert!(!missing.retryable);

    // x landed everywhere.
    assert_eq!(report.merges.len(), 40);
    assert!(store.read(d("2025-01-15")).unwrap().contains("x"));

    // y is retried next run; z is known but has no history.
    assert!(outcome.universe.contains("x"));
    assert!(!outcome.universe.contains("y"));
    assert_eq!(
        outcome.universe.get("z").unwrap().backfill,
        BackfillState::Unavailable
    );
    assert_eq!(outcome.universe.get("z").unwrap().first_seen, d("2025-02-10"));
}

#[test]
fn listing_failure_aborts_the_run() {
    struct Down;
    impl HistoryProvider for Down {
        fn name(&self) -> &str {
            "down"
        }
        fn top_markets(&self, _k: usize) -> Result<Vec<MarketListing>, FetchError> {
            Err(FetchError::Transient {
                target: "markets".into(),
                reason: "timeout".into(),
            })
        }
        fn fetch_history(
            &self,
            coin_id: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<HistoryPoint>, FetchError> {
            Err(FetchError::NotFound {
                coin_id: coin_id.into(),
            })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let updater = IncrementalUpdater::new(store, Arc::new(Down), classifier());
    let err = updater.run(CoinUniverse::new(), &opts()).unwrap_err();
    assert!(matches!(err, UpdateError::Listing { top_k: 1000, .. }));
}

// ── Dry run ──────────────────────────────────────────────────────────

#[test]
fn dry_run_reports_merges_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();
    let before = snapshot_bytes(&store);

    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("x", 250.0)]))
            .with_history("x", Ok(history("2025-01-01", "2025-02-10", 250.0))),
    );
    let oplog_path = dir.path().join("oplog.jsonl");
    let cache = HistoryCache::new(dir.path().join("history"));
    let updater = IncrementalUpdater::new(store.clone(), provider, classifier())
        .with_cache(cache.clone())
        .with_oplog(OperationLog::new(&oplog_path));

    let outcome = updater.run(universe.clone(), &opts().with_dry_run(true)).unwrap();

    assert!(outcome.report.dry_run);
    assert_eq!(outcome.report.merges.len(), 40);
    assert!(outcome.report.merges.iter().all(|m| !m.written));
    assert_eq!(outcome.report.merges[0].added[0].rank, 2);
    assert_eq!(outcome.universe, universe);
    assert!(!outcome.report.entrants[0].registered);

    assert_eq!(snapshot_bytes(&store), before);
    assert!(!oplog_path.exists());
    assert_eq!(
        cache.coverage("x", d("2025-01-01"), d("2025-02-10")),
        Coverage::NotCached
    );
}

// ── Idempotency ──────────────────────────────────────────────────────

#[test]
fn rerunning_with_a_stale_universe_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();

    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("x", 250.0)]))
            .with_history("x", Ok(history("2025-01-01", "2025-02-10", 250.0))),
    );
    let updater = IncrementalUpdater::new(store.clone(), provider, classifier());

    let first = updater.run(universe.clone(), &opts()).unwrap();
    assert_eq!(first.report.rows_added(), 40);
    let after_first = snapshot_bytes(&store);

    // Same universe as before the first run, e.g. the universe file was not saved.
    let second = updater.run(universe, &opts()).unwrap();
    assert!(second.report.merges.is_empty());
    assert!(second.report.merge_failures.is_empty());
    assert_eq!(snapshot_bytes(&store), after_first);
    assert!(second.universe.contains("x"));

    // With the grown universe, x is no longer an entrant at all.
    let third = updater.run(first.universe, &opts()).unwrap();
    assert_eq!(third.report.status(), UpdateStatus::UpToDate);
}

#[test]
fn cached_history_is_not_refetched() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();

    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("x", 250.0)]))
            .with_history("x", Ok(history("2025-01-01", "2025-02-10", 250.0))),
    );
    let cache = HistoryCache::new(dir.path().join("history"));
    let updater = IncrementalUpdater::new(store.clone(), provider.clone(), classifier())
        .with_cache(cache.clone());

    updater.run(universe.clone(), &opts()).unwrap();
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        cache.coverage("x", d("2025-01-01"), d("2025-02-10")),
        Coverage::Full
    );

    let again = updater.run(universe, &opts()).unwrap();
    assert_eq!(provider.calls(), 1);
    assert_eq!(again.report.entrants[0].points, 41);
}

#[test]
fn history_starting_after_the_backfill_start_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();

    // Listed mid-range: the provider has nothing before 2025-02-01.
    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("late", 50.0)]))
            .with_history("late", Ok(history("2025-02-01", "2025-02-10", 50.0))),
    );
    let cache = HistoryCache::new(dir.path().join("history"));
    let updater = IncrementalUpdater::new(store.clone(), provider.clone(), classifier())
        .with_cache(cache.clone());

    updater.run(universe.clone(), &opts()).unwrap();
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        cache.coverage("late", d("2025-01-01"), d("2025-02-10")),
        Coverage::Full
    );

    let again = updater.run(universe, &opts()).unwrap();
    assert_eq!(provider.calls(), 1);
    assert_eq!(again.report.entrants[0].points, 10);
}

// ── Entrant bookkeeping ──────────────────────────────────────────────

#[test]
fn entrant_without_history_is_registered_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();

    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("ghost", 80.0)])).with_history("ghost", Ok(vec![])),
    );
    let updater = IncrementalUpdater::new(store.clone(), provider, classifier());
    let outcome = updater.run(universe, &opts()).unwrap();

    let ghost = &outcome.report.entrants[0];
    assert_eq!(ghost.points, 0);
    assert_eq!(ghost.backfill, BackfillState::Unavailable);
    assert!(ghost.registered);
    assert!(outcome.report.merges.is_empty());
    assert!(outcome.report.to_string().contains("history unavailable"));

    let record = outcome.universe.get("ghost").unwrap();
    assert_eq!(record.backfill, BackfillState::Unavailable);
    assert_eq!(record.first_seen, d("2025-02-10"));
}

#[test]
fn stale_cached_verdict_is_refreshed_for_an_entrant() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();

    let classifier = Arc::new(Classifier::new(StaticTaxonomy::new().with_tags("x", &["Meme"])));
    assert!(classifier.classify("x").is_native());
    classifier.source().upsert(CoinMetadata {
        id: "x".into(),
        symbol: "X".into(),
        name: Some("Wrapped X".into()),
        categories: vec!["Wrapped-Tokens".into()],
        last_updated: None,
    });

    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("x", 250.0)]))
            .with_history("x", Ok(history("2025-01-01", "2025-02-10", 250.0))),
    );
    let updater = IncrementalUpdater::new(store, provider, classifier.clone());
    let outcome = updater.run(universe, &opts()).unwrap();

    assert_eq!(outcome.report.entrants[0].classification, "wrapped");
    assert!(classifier.classify("x").is_wrapped);
}

// ── Operation log ────────────────────────────────────────────────────

#[test]
fn downloads_and_merges_are_logged() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let universe = CoinUniverse::from_store(store.as_ref()).unwrap();

    let provider = Arc::new(
        ScriptedProvider::new(listings_with(&[("x", 250.0), ("z", 10.0)]))
            .with_history("x", Ok(history("2025-01-01", "2025-02-10", 250.0))),
    );
    let log = OperationLog::new(dir.path().join("logs/oplog.jsonl"));
    let updater = IncrementalUpdater::new(store, provider, classifier())
        .with_oplog(OperationLog::new(log.path()));
    updater.run(universe, &opts()).unwrap();

    let records = log.read_all().unwrap();
    let downloads: Vec<_> = records
        .iter()
        .filter(|r| r.kind == OperationKind::Download)
        .collect();
    assert_eq!(downloads.len(), 2);
    assert!(downloads
        .iter()
        .any(|r| r.coin_id.as_deref() == Some("x") && r.ok));
    assert!(downloads
        .iter()
        .any(|r| r.coin_id.as_deref() == Some("z") && !r.ok));

    let merges = records
        .iter()
        .filter(|r| r.kind == OperationKind::Merge && r.ok)
        .count();
    assert_eq!(merges, 40);
}

// ── Daily snapshot recording ─────────────────────────────────────────

#[test]
fn listing_snapshot_is_recorded_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let updater = IncrementalUpdater::new(store.clone(), provider, classifier());

    let listings = listings_with(&[("x", 250.0)]);
    let snap = updater
        .record_listing_snapshot(d("2025-02-10"), &listings)
        .unwrap();
    assert_eq!(snap.len(), 4);
    assert_eq!(store.read(d("2025-02-10")).unwrap().get("x").unwrap().rank, 2);

    let again = updater.record_listing_snapshot(d("2025-02-10"), &listings);
    assert!(matches!(
        again,
        Err(UpdateError::Store(StoreError::AlreadyFinalized { .. }))
    ));

    let finalized = updater.record_listing_snapshot(d("2025-01-05"), &listings);
    assert!(matches!(
        finalized,
        Err(UpdateError::Store(StoreError::AlreadyFinalized { .. }))
    ));
    assert_eq!(store.read(d("2025-01-05")).unwrap().len(), 3);
}

#[test]
fn unusable_listings_are_dropped_from_a_new_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FlatFileStore::new(dir.path().join("daily")));
    let updater = IncrementalUpdater::new(
        store.clone(),
        Arc::new(ScriptedProvider::new(vec![])),
        classifier(),
    );

    let mut listings = listings_with(&[]);
    listings[1].market_cap = f64::NAN;
    let snap = updater
        .record_listing_snapshot(d("2025-03-01"), &listings)
        .unwrap();
    let ids: Vec<&str> = snap.coin_ids().collect();
    assert_eq!(ids, vec!["a", "c"]);

    let empty = updater.record_listing_snapshot(d("2025-03-02"), &[]);
    assert!(matches!(empty, Err(UpdateError::InvalidListing { .. })));
}
