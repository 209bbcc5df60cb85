//! Incremental Updater: grows the coin universe and back-merges new entrants.
//!
//! One run:
//! 1. fetch the current top-K listing
//! 2. diff it against the universe to find new entrants
//! 3. classify the entrants
//! 4. backfill each entrant's history on a bounded worker pool
//! 5. merge the history into every overlapping finalized snapshot, rebuilding
//!    that snapshot's ranks from scratch
//!
//! Workers only produce values (a history, a merged snapshot); the universe
//! and the report are reduced on the calling thread. One entrant's failure
//! never aborts the others.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use rayon::prelude::*;
use thiserror::Error;

use coinindex_core::classification::Classify;
use coinindex_core::data::{
    sanitize_history, Coverage, FetchError, HistoryCache, HistoryPoint, HistoryProvider,
    MarketListing,
};
use coinindex_core::domain::{BackfillState, CoinRecord, CoinUniverse, DailySnapshot, MarketRow};
use coinindex_core::store::{DateLocks, SnapshotStore, StoreError};

use crate::config::UpdaterConfig;
use crate::report::{
    BackfillFailure, DateMerge, EntrantOutcome, MergeFailure, MergedRow, OperationKind,
    OperationLog, OperationRecord, UpdateReport,
};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to fetch the top {top_k} listing: {source}")]
    Listing {
        top_k: usize,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to build worker pool: {0}")]
    Pool(String),

    #[error("listing for {date} cannot form a snapshot: {reason}")]
    InvalidListing { date: NaiveDate, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOptions {
    /// Date the run is for; also the end of the backfill range.
    pub run_date: NaiveDate,
    pub top_k: usize,
    pub max_workers: usize,
    /// Backfill start when the store holds no snapshot yet.
    pub history_start: Option<NaiveDate>,
    /// Compute the diff and the would-be merges without writing anything.
    pub dry_run: bool,
}

impl UpdateOptions {
    pub fn new(run_date: NaiveDate) -> Self {
        Self::from_config(&UpdaterConfig::default(), run_date)
    }

    pub fn from_config(config: &UpdaterConfig, run_date: NaiveDate) -> Self {
        Self {
            run_date,
            top_k: config.top_k,
            max_workers: config.max_workers,
            history_start: config.history_start,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// The universe after the run (unchanged in a dry run) and what happened.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub universe: CoinUniverse,
    pub report: UpdateReport,
}

pub struct IncrementalUpdater {
    store: Arc<dyn SnapshotStore>,
    provider: Arc<dyn HistoryProvider>,
    classifier: Arc<dyn Classify>,
    cache: Option<HistoryCache>,
    oplog: Option<OperationLog>,
    locks: DateLocks,
}

impl IncrementalUpdater {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        provider: Arc<dyn HistoryProvider>,
        classifier: Arc<dyn Classify>,
    ) -> Self {
        Self {
            store,
            provider,
            classifier,
            cache: None,
            oplog: None,
            locks: DateLocks::new(),
        }
    }

    /// Serve fully covered history from (and save fetched history to) a cache.
    pub fn with_cache(mut self, cache: HistoryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_oplog(mut self, oplog: OperationLog) -> Self {
        self.oplog = Some(oplog);
        self
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn run(
        &self,
        universe: CoinUniverse,
        opts: &UpdateOptions,
    ) -> Result<UpdateOutcome, UpdateError> {
        let started = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.max_workers.max(1))
            .build()
            .map_err(|e| UpdateError::Pool(e.to_string()))?;

        let listings = self
            .provider
            .top_markets(opts.top_k)
            .map_err(|source| UpdateError::Listing {
                top_k: opts.top_k,
                source,
            })?;
        let entrants: Vec<MarketListing> = universe.diff(&listings).into_iter().cloned().collect();

        let finalized = self.store.dates()?;
        let history_start = opts
            .history_start
            .or_else(|| finalized.first().copied())
            .unwrap_or(opts.run_date)
            .min(opts.run_date);
        let history_end = opts.run_date;
        let targets: HashSet<NaiveDate> = finalized
            .iter()
            .copied()
            .filter(|d| *d >= history_start && *d <= history_end)
            .collect();

        log::info!(
            "update {}: {} listed, {} new entrants, backfill {history_start}..={history_end}{}",
            opts.run_date,
            listings.len(),
            entrants.len(),
            if opts.dry_run { " (dry run)" } else { "" }
        );

        let mut report = UpdateReport {
            run_date: opts.run_date,
            dry_run: opts.dry_run,
            top_k: opts.top_k,
            listed: listings.len(),
            history_start,
            history_end,
            new_entrants: entrants.iter().map(|l| l.coin_id.clone()).collect(),
            entrants: Vec::new(),
            backfill_failures: Vec::new(),
            merges: Vec::new(),
            merge_failures: Vec::new(),
            universe_size: universe.len(),
            elapsed_ms: 0,
        };
        if entrants.is_empty() {
            report.elapsed_ms = started.elapsed().as_millis() as u64;
            return Ok(UpdateOutcome { universe, report });
        }

        // Classification runs before any merge so eligibility is known at merge time.
        // A verdict cached before the coin entered the listing may predate a
        // metadata change, so entrants are re-read first.
        let ids: Vec<&str> = entrants.iter().map(|l| l.coin_id.as_str()).collect();
        for id in &ids {
            if self.classifier.refresh(id) {
                log::debug!("{id}: classification refreshed");
            }
        }
        let verdicts = self.classifier.classify_many(&ids);

        let fetched: Vec<(&MarketListing, Result<Vec<HistoryPoint>, FetchError>)> =
            pool.install(|| {
                entrants
                    .par_iter()
                    .map(|l| {
                        let result = self.backfill(&l.coin_id, history_start, history_end, opts.dry_run);
                        (l, result)
                    })
                    .collect()
            });

        // ── Reduce backfills ──
        let mut per_date: BTreeMap<NaiveDate, Vec<MarketRow>> = BTreeMap::new();
        let mut first_point: HashMap<String, NaiveDate> = HashMap::new();
        let mut slot: HashMap<String, usize> = HashMap::new();

        for (listing, result) in fetched {
            let classification = verdicts
                .get(&listing.coin_id)
                .map_or("native", |v| v.label())
                .to_string();
            let outcome = |points, backfill| EntrantOutcome {
                coin_id: listing.coin_id.clone(),
                symbol: listing.symbol.clone(),
                classification: classification.clone(),
                points,
                merged_dates: Vec::new(),
                backfill,
                registered: false,
            };

            match result {
                Ok(points) => {
                    self.record(
                        opts.dry_run,
                        OperationRecord::new(
                            OperationKind::Download,
                            true,
                            format!("{} points", points.len()),
                        )
                        .coin(&listing.coin_id),
                    );
                    if let Some(p) = points.first() {
                        first_point.insert(listing.coin_id.clone(), p.date);
                    }
                    for p in points.iter().filter(|p| targets.contains(&p.date)) {
                        per_date.entry(p.date).or_default().push(MarketRow {
                            coin_id: listing.coin_id.clone(),
                            symbol: listing.symbol.clone(),
                            price: p.price,
                            volume: p.volume,
                            market_cap: p.market_cap,
                            rank: 0,
                        });
                    }
                    // Nothing to merge and nothing to date the coin by.
                    let state = if points.is_empty() {
                        log::warn!("{}: provider returned no history", listing.coin_id);
                        BackfillState::Unavailable
                    } else {
                        BackfillState::Complete
                    };
                    slot.insert(listing.coin_id.clone(), report.entrants.len());
                    report.entrants.push(outcome(points.len(), state));
                }
                Err(err) => {
                    log::warn!("backfill failed for {}: {err}", listing.coin_id);
                    self.record(
                        opts.dry_run,
                        OperationRecord::new(OperationKind::Download, false, err.to_string())
                            .coin(&listing.coin_id),
                    );
                    report.backfill_failures.push(BackfillFailure {
                        coin_id: listing.coin_id.clone(),
                        kind: err.kind().to_string(),
                        reason: err.to_string(),
                        retryable: err.is_retryable(),
                    });
                    if matches!(err, FetchError::NotFound { .. }) {
                        slot.insert(listing.coin_id.clone(), report.entrants.len());
                        report
                            .entrants
                            .push(outcome(0, BackfillState::Unavailable));
                    }
                }
            }
        }

        // ── Merge, one worker per date ──
        let dates: Vec<(NaiveDate, Vec<MarketRow>)> = per_date.into_iter().collect();
        let merged: Vec<(NaiveDate, Result<Option<DateMerge>, StoreError>)> = pool.install(|| {
            dates
                .par_iter()
                .map(|(date, rows)| (*date, self.merge_date(*date, rows, opts.dry_run)))
                .collect()
        });

        let mut tainted: HashSet<String> = HashSet::new();
        for ((date, result), (_, rows)) in merged.into_iter().zip(&dates) {
            match result {
                Ok(Some(merge)) => {
                    for added in &merge.added {
                        if let Some(&i) = slot.get(&added.coin_id) {
                            report.entrants[i].merged_dates.push(date);
                        }
                    }
                    self.record(
                        opts.dry_run,
                        OperationRecord::new(
                            OperationKind::Merge,
                            true,
                            format!("{} rows added, {} total", merge.added.len(), merge.row_count),
                        )
                        .on(date),
                    );
                    report.merges.push(merge);
                }
                Ok(None) => log::debug!("{date}: entrants already present"),
                Err(err) => {
                    log::warn!("merge into {date} failed: {err}");
                    self.record(
                        opts.dry_run,
                        OperationRecord::new(OperationKind::Merge, false, err.to_string()).on(date),
                    );
                    tainted.extend(rows.iter().map(|r| r.coin_id.clone()));
                    report.merge_failures.push(MergeFailure {
                        date,
                        reason: err.to_string(),
                    });
                }
            }
        }

        // ── Register ──
        // An entrant whose rows did not all land stays unregistered so the
        // next run retries it; merges skip rows that are already present.
        let mut universe = universe;
        if !opts.dry_run {
            let by_id: HashMap<&str, &MarketListing> =
                entrants.iter().map(|l| (l.coin_id.as_str(), l)).collect();
            for entrant in report.entrants.iter_mut() {
                if tainted.contains(&entrant.coin_id) {
                    continue;
                }
                let Some(listing) = by_id.get(entrant.coin_id.as_str()) else {
                    continue;
                };
                entrant.registered = universe.register(CoinRecord {
                    id: entrant.coin_id.clone(),
                    symbol: listing.symbol.clone(),
                    name: Some(listing.name.clone()),
                    first_seen: first_point
                        .get(&entrant.coin_id)
                        .copied()
                        .unwrap_or(opts.run_date),
                    backfill: entrant.backfill,
                });
            }
        }

        report.universe_size = universe.len();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "update {}: {} rows merged into {} snapshots, {} backfill failures, {} merge failures",
            opts.run_date,
            report.rows_added(),
            report.merges.len(),
            report.backfill_failures.len(),
            report.merge_failures.len()
        );
        Ok(UpdateOutcome { universe, report })
    }

    /// Write a fresh snapshot for `date` from a market listing. Refuses to
    /// touch a date that is already finalized.
    pub fn record_listing_snapshot(
        &self,
        date: NaiveDate,
        listings: &[MarketListing],
    ) -> Result<DailySnapshot, UpdateError> {
        let _guard = self.locks.lock(date);
        if self.store.exists(date)? {
            return Err(StoreError::AlreadyFinalized { date }.into());
        }

        let rows: Vec<MarketRow> = listings
            .iter()
            .filter(|l| {
                let usable = [l.price, l.volume, l.market_cap]
                    .iter()
                    .all(|v| v.is_finite() && *v >= 0.0);
                if !usable {
                    log::warn!("{date}: dropping listing {} with unusable values", l.coin_id);
                }
                usable
            })
            .map(MarketListing::to_row)
            .collect();
        if rows.is_empty() {
            return Err(UpdateError::InvalidListing {
                date,
                reason: "no usable listings".into(),
            });
        }

        let snapshot = DailySnapshot::from_rows(date, rows).map_err(|v| {
            UpdateError::InvalidListing {
                date,
                reason: v.to_string(),
            }
        })?;
        self.store.write(&snapshot)?;
        self.record(
            false,
            OperationRecord::new(
                OperationKind::Snapshot,
                true,
                format!("{} rows", snapshot.len()),
            )
            .on(date),
        );
        log::info!("recorded {date} snapshot with {} rows", snapshot.len());
        Ok(snapshot)
    }

    /// Fetch the top-K listing and record it as `date`'s snapshot.
    pub fn snapshot(&self, date: NaiveDate, top_k: usize) -> Result<DailySnapshot, UpdateError> {
        let listings = self
            .provider
            .top_markets(top_k)
            .map_err(|source| UpdateError::Listing { top_k, source })?;
        self.record_listing_snapshot(date, &listings)
    }

    fn backfill(
        &self,
        coin_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        dry_run: bool,
    ) -> Result<Vec<HistoryPoint>, FetchError> {
        if let Some(cache) = &self.cache {
            if cache.coverage(coin_id, start, end) == Coverage::Full {
                match cache.load_range(coin_id, start, end) {
                    Ok(points) => {
                        log::debug!("{coin_id}: {} points from cache", points.len());
                        return Ok(sanitize_history(points));
                    }
                    Err(e) => log::warn!("{coin_id}: cache unreadable, refetching: {e}"),
                }
            }
        }

        let points: Vec<HistoryPoint> =
            sanitize_history(self.provider.fetch_history(coin_id, start, end)?)
                .into_iter()
                .filter(|p| p.date >= start && p.date <= end)
                .collect();
        log::debug!("{coin_id}: fetched {} points", points.len());

        if let Some(cache) = self.cache.as_ref().filter(|_| !dry_run && !points.is_empty()) {
            if let Err(e) = cache.store_fetched(coin_id, &points, self.provider.name(), start) {
                log::warn!("{coin_id}: failed to cache history: {e}");
            }
        }
        Ok(points)
    }

    /// Merge `rows` into the finalized snapshot for `date`. `None` when every
    /// row was already present.
    fn merge_date(
        &self,
        date: NaiveDate,
        rows: &[MarketRow],
        dry_run: bool,
    ) -> Result<Option<DateMerge>, StoreError> {
        let _guard = self.locks.lock(date);
        let snapshot = self.store.read(date)?;
        let (merged, added) = snapshot.merge(rows.iter().cloned());
        if added.is_empty() {
            return Ok(None);
        }

        if !dry_run {
            self.store.write(&merged)?;
        }
        log::debug!("{date}: merged {} entrants", added.len());

        Ok(Some(DateMerge {
            date,
            added: added
                .iter()
                .filter_map(|id| merged.get(id))
                .map(|row| MergedRow {
                    coin_id: row.coin_id.clone(),
                    rank: row.rank,
                })
                .collect(),
            row_count: merged.len(),
            written: !dry_run,
        }))
    }

    fn record(&self, dry_run: bool, record: OperationRecord) {
        if dry_run {
            return;
        }
        if let Some(log) = &self.oplog {
            if let Err(e) = log.append(&record) {
                log::warn!("failed to append to {}: {e}", log.path().display());
            }
        }
    }
}
