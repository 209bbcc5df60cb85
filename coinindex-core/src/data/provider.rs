//! History provider trait and structured fetch errors.
//!
//! The provider is the external download collaborator: it supplies the
//! current top-K market listing and a coin's daily history. Retry and backoff
//! are the provider's business; the updater only decides which coins and
//! which date range to request.

use crate::domain::MarketRow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// One day of a coin's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub price: f64,
    pub volume: f64,
    pub market_cap: f64,
}

/// One entry of the current market ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListing {
    pub coin_id: String,
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub volume: f64,
    pub market_cap: f64,
    /// Rank as reported by the provider.
    pub rank: u32,
}

impl MarketListing {
    /// An unranked snapshot row; ranks are rebuilt when the snapshot is assembled.
    pub fn to_row(&self) -> MarketRow {
        MarketRow {
            coin_id: self.coin_id.clone(),
            symbol: self.symbol.clone(),
            price: self.price,
            volume: self.volume,
            market_cap: self.market_cap,
            rank: 0,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network failure, rate limit or server error. Worth retrying later.
    #[error("transient failure fetching {target}: {reason}")]
    Transient { target: String, reason: String },

    /// The provider does not know the coin.
    #[error("coin not found: {coin_id}")]
    NotFound { coin_id: String },

    #[error("response format changed for {target}: {reason}")]
    ResponseFormatChanged { target: String, reason: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// Stable short name for reports and the operation log.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient { .. } => "transient",
            FetchError::NotFound { .. } => "not_found",
            FetchError::ResponseFormatChanged { .. } => "format_changed",
        }
    }
}

/// External source of market listings and per-coin history.
pub trait HistoryProvider: Send + Sync {
    fn name(&self) -> &str;

    /// The current top `k` coins by market cap, in rank order.
    fn top_markets(&self, k: usize) -> Result<Vec<MarketListing>, FetchError>;

    /// Daily history for `start..=end`, ascending by date.
    fn fetch_history(
        &self,
        coin_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, FetchError>;
}

/// Clean a raw series before it is merged into snapshots.
///
/// Drops points with a non-finite or non-positive price or market cap, and
/// points with a non-finite or negative volume. Keeps one point per date (the
/// last one wins) and returns them ascending.
pub fn sanitize_history(points: Vec<HistoryPoint>) -> Vec<HistoryPoint> {
    let mut by_date = BTreeMap::new();
    for p in points {
        let usable = p.price.is_finite()
            && p.price > 0.0
            && p.market_cap.is_finite()
            && p.market_cap > 0.0
            && p.volume.is_finite()
            && p.volume >= 0.0;
        if usable {
            by_date.insert(p.date, p);
        }
    }
    by_date.into_values().collect()
}
