//! Update run summary and the append-only operation log.
//!
//! The report is what an operator reads after `update`: which coins entered,
//! what was merged where, and every per-entrant or per-date failure. The
//! operation log keeps one JSON object per line for each download and merge,
//! across runs.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use coinindex_core::domain::BackfillState;
use serde::{Deserialize, Serialize};

// ─── Run report ─────────────────────────────────────────────────────

/// How one new entrant fared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantOutcome {
    pub coin_id: String,
    pub symbol: String,
    /// Classification label at merge time.
    pub classification: String,
    /// Sanitized history points received.
    pub points: usize,
    /// Snapshot dates the entrant's row was (or, in a dry run, would be) merged into.
    pub merged_dates: Vec<NaiveDate>,
    pub backfill: BackfillState,
    /// Whether the entrant is now in the universe.
    pub registered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillFailure {
    pub coin_id: String,
    /// `transient`, `not_found` or `format_changed`.
    pub kind: String,
    pub reason: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeFailure {
    pub date: NaiveDate,
    pub reason: String,
}

/// One entrant row placed into a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    pub coin_id: String,
    /// Rank after the full rebuild.
    pub rank: u32,
}

/// A snapshot date touched by the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateMerge {
    pub date: NaiveDate,
    pub added: Vec<MergedRow>,
    /// Row count after the merge.
    pub row_count: usize,
    /// False in a dry run.
    pub written: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Nothing new in the listing.
    UpToDate,
    /// Every entrant backfilled and merged.
    Complete,
    /// Some entrants or dates failed; the rest were applied.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub run_date: NaiveDate,
    pub dry_run: bool,
    pub top_k: usize,
    /// Listings returned by the provider.
    pub listed: usize,
    /// Backfill range requested for entrants.
    pub history_start: NaiveDate,
    pub history_end: NaiveDate,
    pub new_entrants: Vec<String>,
    pub entrants: Vec<EntrantOutcome>,
    pub backfill_failures: Vec<BackfillFailure>,
    pub merges: Vec<DateMerge>,
    pub merge_failures: Vec<MergeFailure>,
    pub universe_size: usize,
    pub elapsed_ms: u64,
}

impl UpdateReport {
    pub fn status(&self) -> UpdateStatus {
        if self.new_entrants.is_empty() {
            UpdateStatus::UpToDate
        } else if self.backfill_failures.is_empty() && self.merge_failures.is_empty() {
            UpdateStatus::Complete
        } else {
            UpdateStatus::Partial
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.backfill_failures.is_empty() || !self.merge_failures.is_empty()
    }

    pub fn rows_added(&self) -> usize {
        self.merges.iter().map(|m| m.added.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(f, "Update {}{mode}: {:?}", self.run_date, self.status())?;
        writeln!(
            f,
            "  listed {} of top {}, {} new entrants, universe now {}",
            self.listed,
            self.top_k,
            self.new_entrants.len(),
            self.universe_size
        )?;
        writeln!(
            f,
            "  history {}..={}, {} rows merged into {} snapshots",
            self.history_start,
            self.history_end,
            self.rows_added(),
            self.merges.len()
        )?;
        for e in &self.entrants {
            writeln!(
                f,
                "  + {} ({}, {}): {} points, {} dates{}",
                e.coin_id,
                e.symbol,
                e.classification,
                e.points,
                e.merged_dates.len(),
                if e.backfill == BackfillState::Unavailable { ", history unavailable" } else { "" }
            )?;
        }
        for fail in &self.backfill_failures {
            writeln!(f, "  ! backfill {} [{}]: {}", fail.coin_id, fail.kind, fail.reason)?;
        }
        for fail in &self.merge_failures {
            writeln!(f, "  ! merge {}: {}", fail.date, fail.reason)?;
        }
        write!(f, "  took {} ms", self.elapsed_ms)
    }
}

// ─── Operation log ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Download,
    Merge,
    Snapshot,
    RankRebuild,
}

/// One line of the operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub at: NaiveDateTime,
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub ok: bool,
    pub detail: String,
}

impl OperationRecord {
    pub fn new(kind: OperationKind, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            at: chrono::Local::now().naive_local(),
            kind,
            coin_id: None,
            date: None,
            ok,
            detail: detail.into(),
        }
    }

    pub fn coin(mut self, coin_id: &str) -> Self {
        self.coin_id = Some(coin_id.to_string());
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

/// JSONL file of [`OperationRecord`]s. Each line stands alone, so a torn
/// final line loses one record and nothing else.
pub struct OperationLog {
    path: PathBuf,
}

impl OperationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, record: &OperationRecord) -> io::Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Every readable record; malformed lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<OperationRecord>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        for line in io::BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
