//! Daily market snapshots and the rank invariant.
//!
//! A snapshot holds one row per tracked coin for a single date. The rank
//! column is authoritative: it must be a permutation of `1..=N` ordered by
//! descending market cap, ties broken by coin id ascending. Ranks are always
//! derived from scratch over the full row set, never patched.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// One coin's market data on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRow {
    pub coin_id: String,
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub market_cap: f64,
    pub rank: u32,
}

/// Ordering that defines rank: market cap descending, then coin id ascending.
pub fn rank_order(a: &MarketRow, b: &MarketRow) -> Ordering {
    b.market_cap
        .total_cmp(&a.market_cap)
        .then_with(|| a.coin_id.cmp(&b.coin_id))
}

/// Sort rows into rank order and assign ranks `1..=N`.
pub fn rebuild_ranks(rows: &mut [MarketRow]) {
    rows.sort_by(rank_order);
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = (i + 1) as u32;
    }
}

/// A violation of the snapshot rank invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RankViolation {
    #[error("coin '{coin_id}' appears more than once")]
    DuplicateCoin { coin_id: String },

    #[error("rank {rank} of '{coin_id}' is outside 1..={count}")]
    OutOfRange {
        coin_id: String,
        rank: u32,
        count: usize,
    },

    #[error("rank {rank} is assigned to both '{first}' and '{second}'")]
    DuplicateRank {
        rank: u32,
        first: String,
        second: String,
    },

    #[error("rank {rank} ('{coin_id}') is out of market-cap order after '{previous}'")]
    OutOfOrder {
        rank: u32,
        coin_id: String,
        previous: String,
    },
}

impl RankViolation {
    /// The coin id the violation is reported against.
    pub fn coin_id(&self) -> &str {
        match self {
            RankViolation::DuplicateCoin { coin_id }
            | RankViolation::OutOfRange { coin_id, .. }
            | RankViolation::OutOfOrder { coin_id, .. } => coin_id,
            RankViolation::DuplicateRank { second, .. } => second,
        }
    }
}

/// A finalized, rank-consistent table of market rows for one date,
/// indexed by coin id.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySnapshot {
    date: NaiveDate,
    rows: Vec<MarketRow>,
    index: HashMap<String, usize>,
}

impl DailySnapshot {
    /// Build a snapshot from unranked rows; ranks are derived from market cap.
    pub fn from_rows(date: NaiveDate, mut rows: Vec<MarketRow>) -> Result<Self, RankViolation> {
        check_unique(&rows)?;
        rebuild_ranks(&mut rows);
        Ok(Self::indexed(date, rows))
    }

    /// Build a snapshot from rows whose rank column is authoritative
    /// (e.g. loaded from storage). The rank invariant is verified, not repaired.
    pub fn from_ranked_rows(
        date: NaiveDate,
        mut rows: Vec<MarketRow>,
    ) -> Result<Self, RankViolation> {
        check_unique(&rows)?;
        let count = rows.len();
        for row in &rows {
            if row.rank == 0 || row.rank as usize > count {
                return Err(RankViolation::OutOfRange {
                    coin_id: row.coin_id.clone(),
                    rank: row.rank,
                    count,
                });
            }
        }
        rows.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.coin_id.cmp(&b.coin_id)));
        check_rank_sequence(&rows)?;
        Ok(Self::indexed(date, rows))
    }

    fn indexed(date: NaiveDate, rows: Vec<MarketRow>) -> Self {
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.coin_id.clone(), i))
            .collect();
        Self { date, rows, index }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Rows in rank order.
    pub fn rows(&self) -> &[MarketRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, coin_id: &str) -> Option<&MarketRow> {
        self.index.get(coin_id).map(|&i| &self.rows[i])
    }

    pub fn contains(&self, coin_id: &str) -> bool {
        self.index.contains_key(coin_id)
    }

    pub fn coin_ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.coin_id.as_str())
    }

    /// Re-check the rank invariant.
    pub fn verify_ranks(&self) -> Result<(), RankViolation> {
        check_rank_sequence(&self.rows)
    }

    /// Merge new rows into a copy of this snapshot and rebuild every rank.
    ///
    /// Rows for coins already present are skipped; existing rows keep their
    /// price, volume and market cap. Returns the merged snapshot and the ids
    /// that were actually added.
    pub fn merge(&self, new_rows: impl IntoIterator<Item = MarketRow>) -> (Self, Vec<String>) {
        let mut rows = self.rows.clone();
        let mut seen: HashSet<String> = self.index.keys().cloned().collect();
        let mut added = Vec::new();

        for row in new_rows {
            if seen.insert(row.coin_id.clone()) {
                added.push(row.coin_id.clone());
                rows.push(row);
            }
        }

        rebuild_ranks(&mut rows);
        (Self::indexed(self.date, rows), added)
    }
}

fn check_unique(rows: &[MarketRow]) -> Result<(), RankViolation> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(row.coin_id.as_str()) {
            return Err(RankViolation::DuplicateCoin {
                coin_id: row.coin_id.clone(),
            });
        }
    }
    Ok(())
}

/// Rows must already be sorted by rank.
fn check_rank_sequence(rows: &[MarketRow]) -> Result<(), RankViolation> {
    for (i, row) in rows.iter().enumerate() {
        let expected = (i + 1) as u32;
        if row.rank != expected {
            if i > 0 && rows[i - 1].rank == row.rank {
                return Err(RankViolation::DuplicateRank {
                    rank: row.rank,
                    first: rows[i - 1].coin_id.clone(),
                    second: row.coin_id.clone(),
                });
            }
            return Err(RankViolation::OutOfRange {
                coin_id: row.coin_id.clone(),
                rank: row.rank,
                count: rows.len(),
            });
        }
        if i > 0 && rank_order(&rows[i - 1], row) != Ordering::Less {
            return Err(RankViolation::OutOfOrder {
                rank: row.rank,
                coin_id: row.coin_id.clone(),
                previous: rows[i - 1].coin_id.clone(),
            });
        }
    }
    Ok(())
}
