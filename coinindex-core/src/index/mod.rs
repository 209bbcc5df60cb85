//! Index Calculator: a chained, market-cap-weighted index over a contiguous
//! date range, rebalanced fully every day.

pub mod calculator;
pub mod selection;

pub use calculator::IndexCalculator;
pub use selection::select_constituents;

use crate::store::StoreError;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid index parameters: {0}")]
    InvalidParams(String),

    /// A date in range has no finalized snapshot.
    #[error("data gap: snapshot missing for {date}")]
    DataGap { date: NaiveDate },

    #[error(transparent)]
    Snapshot(StoreError),

    #[error("no eligible constituents on {date} ({rows} rows in snapshot)")]
    NoEligibleConstituents { date: NaiveDate, rows: usize },

    #[error("index chain broken on {date}: no constituent of {previous} is priced on {date}")]
    BrokenChain {
        date: NaiveDate,
        previous: NaiveDate,
    },
}

impl IndexError {
    pub fn from_store(e: StoreError) -> Self {
        match e {
            StoreError::SnapshotMissing { date } => IndexError::DataGap { date },
            other => IndexError::Snapshot(other),
        }
    }

    /// The missing date, for a data gap.
    pub fn missing_date(&self) -> Option<NaiveDate> {
        match self {
            IndexError::DataGap { date } => Some(*date),
            _ => None,
        }
    }
}

impl From<StoreError> for IndexError {
    fn from(e: StoreError) -> Self {
        Self::from_store(e)
    }
}
