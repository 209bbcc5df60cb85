//! Index output types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A coin in the weighted basket for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constituent {
    pub coin_id: String,
    /// Rank in the raw snapshot, not within the eligible set.
    pub rank: u32,
    pub price: f64,
    pub market_cap: f64,
    pub weight: f64,
}

/// The index value and basket for one date. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub total_market_cap: f64,
    pub constituents: Vec<Constituent>,
}

impl IndexPoint {
    pub fn weight_sum(&self) -> f64 {
        self.constituents.iter().map(|c| c.weight).sum()
    }

    pub fn constituent(&self, coin_id: &str) -> Option<&Constituent> {
        self.constituents.iter().find(|c| c.coin_id == coin_id)
    }
}

/// Parameters an index series was computed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub base_date: NaiveDate,
    pub base_value: f64,
    pub top_n: usize,
    pub exclude_stablecoins: bool,
    pub exclude_wrapped: bool,
}

impl IndexParams {
    /// Parameters anchored at `start` with the default basket settings:
    /// top 30, base value 1000, stablecoins and wrapped assets excluded.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start_date: start,
            end_date: end,
            base_date: start,
            base_value: 1000.0,
            top_n: 30,
            exclude_stablecoins: true,
            exclude_wrapped: true,
        }
    }

    pub fn with_base(mut self, base_date: NaiveDate, base_value: f64) -> Self {
        self.base_date = base_date;
        self.base_value = base_value;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_exclusions(mut self, stablecoins: bool, wrapped: bool) -> Self {
        self.exclude_stablecoins = stablecoins;
        self.exclude_wrapped = wrapped;
        self
    }

    /// Describe the first inconsistency, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.start_date > self.end_date {
            return Err(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            ));
        }
        if self.base_date < self.start_date || self.base_date > self.end_date {
            return Err(format!(
                "base date {} is outside {}..={}",
                self.base_date, self.start_date, self.end_date
            ));
        }
        if self.top_n == 0 {
            return Err("top_n must be at least 1".into());
        }
        if !self.base_value.is_finite() || self.base_value <= 0.0 {
            return Err(format!(
                "base value {} must be finite and positive",
                self.base_value
            ));
        }
        Ok(())
    }

    /// Number of calendar days in the range.
    pub fn day_count(&self) -> usize {
        ((self.end_date - self.start_date).num_days() + 1).max(0) as usize
    }
}

/// A computed index series over a contiguous date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSeries {
    pub params: IndexParams,
    pub points: Vec<IndexPoint>,
    /// blake3 hex digest over every input snapshot row, in date order.
    pub input_fingerprint: String,
}

impl IndexSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, date: NaiveDate) -> Option<&IndexPoint> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| &self.points[i])
    }

    pub fn value_on(&self, date: NaiveDate) -> Option<f64> {
        self.point(date).map(|p| p.value)
    }

    pub fn last_value(&self) -> Option<f64> {
        self.points.last().map(|p| p.value)
    }
}
