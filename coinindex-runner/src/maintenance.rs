//! Store maintenance: rank repair and cached-history quality.
//!
//! `verify_ranks` audits stored snapshots without touching them.
//! `rebuild_ranks` re-derives every rank column from market cap and rewrites
//! the dates whose stored ranks differ. `check_history_quality` grades every
//! cached coin series and lists the coins worth downloading again.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use coinindex_core::data::{HistoryCache, HistoryCacheError};
use coinindex_core::domain::DailySnapshot;
use coinindex_core::store::{DateLocks, FlatFileStore, SnapshotStore, StoreError};

use crate::config::QualityConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateIssue {
    pub date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankAudit {
    pub checked: usize,
    pub missing: Vec<NaiveDate>,
    pub invalid: Vec<DateIssue>,
}

impl RankAudit {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankRebuild {
    pub rewritten: Vec<NaiveDate>,
    pub unchanged: usize,
    pub missing: Vec<NaiveDate>,
    /// Dates whose rows could not be ranked at all (e.g. a duplicated coin).
    pub skipped: Vec<DateIssue>,
}

fn days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

/// Check every date in `start..=end`. Malformed snapshots are reported, not
/// raised; only backend failures abort the audit.
pub fn verify_ranks(
    store: &dyn SnapshotStore,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<RankAudit, StoreError> {
    let mut audit = RankAudit::default();
    for date in days(start, end) {
        match store.read(date) {
            Ok(_) => audit.checked += 1,
            Err(StoreError::SnapshotMissing { .. }) => audit.missing.push(date),
            Err(e @ StoreError::MalformedSnapshot { .. }) => {
                audit.checked += 1;
                audit.invalid.push(DateIssue {
                    date,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    log::info!(
        "rank audit {start}..={end}: {} checked, {} invalid, {} missing",
        audit.checked,
        audit.invalid.len(),
        audit.missing.len()
    );
    Ok(audit)
}

/// Rebuild ranks for every stored date in `start..=end`.
pub fn rebuild_ranks(
    store: &dyn SnapshotStore,
    locks: &DateLocks,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<RankRebuild, StoreError> {
    let mut result = RankRebuild::default();
    for date in days(start, end) {
        let _guard = locks.lock(date);
        let rows = match store.read_rows(date) {
            Ok(rows) => rows,
            Err(StoreError::SnapshotMissing { .. }) => {
                result.missing.push(date);
                continue;
            }
            Err(e @ StoreError::MalformedSnapshot { .. }) => {
                result.skipped.push(DateIssue {
                    date,
                    reason: e.to_string(),
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        let stored: Vec<(String, u32)> = rows.iter().map(|r| (r.coin_id.clone(), r.rank)).collect();
        let rebuilt = match DailySnapshot::from_rows(date, rows) {
            Ok(snapshot) => snapshot,
            Err(violation) => {
                result.skipped.push(DateIssue {
                    date,
                    reason: violation.to_string(),
                });
                continue;
            }
        };

        let same = stored
            .iter()
            .all(|(id, rank)| rebuilt.get(id).is_some_and(|r| r.rank == *rank));
        if same {
            result.unchanged += 1;
        } else {
            store.write(&rebuilt)?;
            log::debug!("{date}: ranks rebuilt");
            result.rewritten.push(date);
        }
    }
    log::info!(
        "rank rebuild {start}..={end}: {} rewritten, {} unchanged, {} skipped",
        result.rewritten.len(),
        result.unchanged,
        result.skipped.len()
    );
    Ok(result)
}

// ─── History quality ────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum QualityError {
    #[error(transparent)]
    Cache(#[from] HistoryCacheError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What is wrong with a cached series. Only the first failing check is
/// reported, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    Unreadable,
    InsufficientData,
    IntervalGap,
    Outdated,
}

impl QualityIssue {
    pub fn label(&self) -> &'static str {
        match self {
            QualityIssue::Unreadable => "unreadable",
            QualityIssue::InsufficientData => "insufficient_data",
            QualityIssue::IntervalGap => "interval_gap",
            QualityIssue::Outdated => "outdated",
        }
    }
}

/// Two consecutive rows further apart than the allowed gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryGap {
    pub after: NaiveDate,
    pub before: NaiveDate,
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinQuality {
    pub coin_id: String,
    pub rows: usize,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
    pub span_days: i64,
    pub days_since_latest: Option<i64>,
    /// Calendar days between the first and last row with no row.
    pub missing_days: usize,
    pub gaps: Vec<HistoryGap>,
    pub issue: Option<QualityIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A date-named snapshot file outside its `{YYYY}/{MM}` folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MisplacedSnapshot {
    pub date: NaiveDate,
    pub path: PathBuf,
    pub expected: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub as_of: NaiveDate,
    pub coins: Vec<CoinQuality>,
    pub misplaced_snapshots: Vec<MisplacedSnapshot>,
}

impl QualityReport {
    pub fn good(&self) -> usize {
        self.coins.iter().filter(|c| c.issue.is_none()).count()
    }

    pub fn problematic(&self) -> impl Iterator<Item = &CoinQuality> {
        self.coins.iter().filter(|c| c.issue.is_some())
    }

    pub fn issue_counts(&self) -> BTreeMap<QualityIssue, usize> {
        let mut counts = BTreeMap::new();
        for issue in self.coins.iter().filter_map(|c| c.issue) {
            *counts.entry(issue).or_insert(0) += 1;
        }
        counts
    }

    /// Coins whose cached history should be fetched again, sorted.
    pub fn redownload(&self) -> Vec<&str> {
        self.problematic().map(|c| c.coin_id.as_str()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.good() == self.coins.len() && self.misplaced_snapshots.is_empty()
    }
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "History quality as of {}: {} coins, {} good, {} problematic",
            self.as_of,
            self.coins.len(),
            self.good(),
            self.coins.len() - self.good()
        )?;
        for (issue, count) in self.issue_counts() {
            writeln!(f, "  {:<18} {count}", issue.label())?;
        }
        for c in self.problematic() {
            let issue = c.issue.map_or("", |i| i.label());
            match (&c.error, c.latest) {
                (Some(err), _) => writeln!(f, "  ! {} [{issue}]: {err}", c.coin_id)?,
                (None, Some(latest)) => writeln!(
                    f,
                    "  ! {} [{issue}]: {} rows, last {latest}, {} missing days, {} gaps",
                    c.coin_id,
                    c.rows,
                    c.missing_days,
                    c.gaps.len()
                )?,
                (None, None) => writeln!(f, "  ! {} [{issue}]", c.coin_id)?,
            }
        }
        for m in &self.misplaced_snapshots {
            writeln!(
                f,
                "  ! snapshot {} at {} (expected {})",
                m.date,
                m.path.display(),
                m.expected.display()
            )?;
        }
        write!(f, "  redownload: {}", self.redownload().len())
    }
}

/// Grade one sorted, non-empty date series.
fn grade(coin_id: &str, dates: &[NaiveDate], as_of: NaiveDate, config: &QualityConfig) -> CoinQuality {
    let (earliest, latest) = match (dates.first(), dates.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return unreadable(coin_id, "no rows".to_string()),
    };
    let span_days = (latest - earliest).num_days();
    let days_since_latest = (as_of - latest).num_days();

    let mut gaps = Vec::new();
    let mut missing_days = 0;
    for pair in dates.windows(2) {
        let days = (pair[1] - pair[0]).num_days();
        missing_days += (days - 1).max(0) as usize;
        if days > config.max_gap_days {
            gaps.push(HistoryGap {
                after: pair[0],
                before: pair[1],
                days,
            });
        }
    }

    // A newly listed coin gets a longer staleness allowance.
    let max_age = if span_days < config.min_data_span_days {
        config.new_coin_max_days_old
    } else {
        config.max_days_old
    };
    let issue = if dates.len() < config.min_rows {
        Some(QualityIssue::InsufficientData)
    } else if !gaps.is_empty() {
        Some(QualityIssue::IntervalGap)
    } else if days_since_latest > max_age {
        Some(QualityIssue::Outdated)
    } else {
        None
    };

    CoinQuality {
        coin_id: coin_id.to_string(),
        rows: dates.len(),
        earliest: Some(earliest),
        latest: Some(latest),
        span_days,
        days_since_latest: Some(days_since_latest),
        missing_days,
        gaps,
        issue,
        error: None,
    }
}

fn unreadable(coin_id: &str, error: String) -> CoinQuality {
    CoinQuality {
        coin_id: coin_id.to_string(),
        rows: 0,
        earliest: None,
        latest: None,
        span_days: 0,
        days_since_latest: None,
        missing_days: 0,
        gaps: Vec::new(),
        issue: Some(QualityIssue::Unreadable),
        error: Some(error),
    }
}

/// Grade every cached coin as of `as_of`. With a flat snapshot store, also
/// list snapshot files sitting in the wrong year/month folder.
///
/// A coin whose history cannot be read is reported, not raised; only a
/// failure to list the cache or the snapshot tree aborts the check.
pub fn check_history_quality(
    cache: &HistoryCache,
    snapshots: Option<&FlatFileStore>,
    as_of: NaiveDate,
    config: &QualityConfig,
) -> Result<QualityReport, QualityError> {
    let ids = cache.coin_ids()?;
    let coins: Vec<CoinQuality> = ids
        .par_iter()
        .map(|id| match cache.load(id) {
            Ok(points) => {
                let mut dates: Vec<NaiveDate> = points.iter().map(|p| p.date).collect();
                dates.sort();
                dates.dedup();
                grade(id, &dates, as_of, config)
            }
            Err(e) => unreadable(id, e.to_string()),
        })
        .collect();

    let misplaced_snapshots = match snapshots {
        Some(store) => store
            .misplaced_files()?
            .into_iter()
            .map(|(date, path)| MisplacedSnapshot {
                date,
                path,
                expected: store.path_for(date),
            })
            .collect(),
        None => Vec::new(),
    };

    let report = QualityReport {
        as_of,
        coins,
        misplaced_snapshots,
    };
    log::info!(
        "history quality {as_of}: {} coins, {} good, {} to redownload, {} misplaced snapshots",
        report.coins.len(),
        report.good(),
        report.redownload().len(),
        report.misplaced_snapshots.len()
    );
    Ok(report)
}
