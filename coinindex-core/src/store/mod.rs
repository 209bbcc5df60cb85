//! Daily snapshot storage.
//!
//! One [`SnapshotStore`] interface with two strategies behind it: flat CSV
//! files partitioned by year and month, and a single SQLite database. Both
//! run every row through [`validate::parse_row`], so consumers observe the
//! same rows and the same errors whichever backend holds the data.

pub mod flat;
pub mod locks;
pub mod sqlite;
pub mod validate;

pub use flat::FlatFileStore;
pub use locks::{DateGuard, DateLocks};
pub use sqlite::SqliteStore;

use crate::domain::{DailySnapshot, MarketRow, RankViolation};
use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot missing for {date}")]
    SnapshotMissing { date: NaiveDate },

    #[error("malformed snapshot {date}: row {row}, field '{field}': {reason}")]
    MalformedSnapshot {
        date: NaiveDate,
        /// 1-based data row; 0 refers to the header or the snapshot as a whole.
        row: usize,
        field: String,
        reason: String,
    },

    #[error("snapshot for {date} is already finalized")]
    AlreadyFinalized { date: NaiveDate },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn malformed(
        date: NaiveDate,
        row: usize,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        StoreError::MalformedSnapshot {
            date,
            row,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    fn from_rank(date: NaiveDate, rows: &[MarketRow], violation: RankViolation) -> Self {
        let field = match violation {
            RankViolation::DuplicateCoin { .. } => "coin_id",
            _ => "rank",
        };
        // report the last row carrying the offending id
        let row = rows
            .iter()
            .rposition(|r| r.coin_id == violation.coin_id())
            .map_or(0, |i| i + 1);
        StoreError::malformed(date, row, field, violation.to_string())
    }
}

/// Storage for finalized daily snapshots.
///
/// `write` is a full overwrite of one date and is atomic: readers see either
/// the previous snapshot or the new one, never a mix.
pub trait SnapshotStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Rows of a date, each validated, in stored order.
    /// The rank column is returned as stored and not yet checked.
    fn read_rows(&self, date: NaiveDate) -> Result<Vec<MarketRow>, StoreError>;

    fn write(&self, snapshot: &DailySnapshot) -> Result<(), StoreError>;

    fn exists(&self, date: NaiveDate) -> Result<bool, StoreError>;

    /// Every stored date, ascending.
    fn dates(&self) -> Result<Vec<NaiveDate>, StoreError>;

    /// Load a finalized snapshot, enforcing the rank invariant.
    fn read(&self, date: NaiveDate) -> Result<DailySnapshot, StoreError> {
        let rows = self.read_rows(date)?;
        if rows.is_empty() {
            return Err(StoreError::malformed(date, 0, "*", "snapshot has no data rows"));
        }
        match DailySnapshot::from_ranked_rows(date, rows.clone()) {
            Ok(snapshot) => Ok(snapshot),
            Err(violation) => Err(StoreError::from_rank(date, &rows, violation)),
        }
    }
}
