//! Chained index computation.
//!
//! For each date D after the first:
//!
//! ```text
//! r(D) = Σ w_i(D-1) · p_i(D) / p_i(D-1)  /  Σ w_i(D-1)
//! ```
//!
//! summed over D-1's constituents that have a priced row in D's snapshot.
//! A constituent missing on D drops out and its weight is spread pro rata
//! over the rest; nothing is carried forward. `v(base) = base_value`,
//! `v(D) = v(D-1) · r(D)` after the base date and `v(D-1) = v(D) / r(D)`
//! before it.
//!
//! Dates are processed strictly in order and every date in range must have
//! a finalized snapshot: the first gap fails the whole run.

use super::selection::{is_priced, select_constituents};
use super::IndexError;
use crate::aggregator::SnapshotAggregator;
use crate::classification::{Classify, EligibilityFilter};
use crate::domain::{Constituent, DailySnapshot, IndexParams, IndexPoint, IndexSeries};
use crate::fingerprint::SnapshotFingerprint;
use chrono::NaiveDate;

pub struct IndexCalculator<'a> {
    aggregator: &'a SnapshotAggregator,
    classifier: &'a dyn Classify,
}

/// One day's basket before the chain is anchored.
struct Basket {
    date: NaiveDate,
    constituents: Vec<Constituent>,
    total_market_cap: f64,
}

impl<'a> IndexCalculator<'a> {
    pub fn new(aggregator: &'a SnapshotAggregator, classifier: &'a dyn Classify) -> Self {
        Self {
            aggregator,
            classifier,
        }
    }

    /// Compute the series for `params`. Pure in its snapshot inputs: the same
    /// snapshots and parameters always give the same series.
    pub fn compute(&self, params: &IndexParams) -> Result<IndexSeries, IndexError> {
        params.validate().map_err(IndexError::InvalidParams)?;

        let missing = self
            .aggregator
            .missing_dates(params.start_date, params.end_date)?;
        if let Some(&date) = missing.first() {
            return Err(IndexError::DataGap { date });
        }

        let filter = EligibilityFilter::new(params.exclude_stablecoins, params.exclude_wrapped);
        let mut fingerprint = SnapshotFingerprint::new();
        let mut baskets: Vec<Basket> = Vec::with_capacity(params.day_count());
        let mut relatives: Vec<f64> = Vec::with_capacity(params.day_count());

        for date in params
            .start_date
            .iter_days()
            .take_while(|d| *d <= params.end_date)
        {
            let snapshot = self.aggregator.load(date)?;
            fingerprint.update(&snapshot);

            if let Some(previous) = baskets.last() {
                relatives.push(chain_relative(previous, &snapshot)?);
            }

            let constituents = select_constituents(&snapshot, self.classifier, filter, params.top_n);
            if constituents.is_empty() {
                return Err(IndexError::NoEligibleConstituents {
                    date,
                    rows: snapshot.len(),
                });
            }
            log::debug!(
                "{date}: {} constituents from {} rows",
                constituents.len(),
                snapshot.len()
            );
            baskets.push(Basket {
                date,
                total_market_cap: constituents.iter().map(|c| c.market_cap).sum(),
                constituents,
            });
        }

        let values = anchor(params, &relatives);
        let points = baskets
            .into_iter()
            .zip(values)
            .map(|(b, value)| IndexPoint {
                date: b.date,
                value,
                total_market_cap: b.total_market_cap,
                constituents: b.constituents,
            })
            .collect::<Vec<_>>();

        log::info!(
            "index computed: {} points {}..={}, base {} = {}",
            points.len(),
            params.start_date,
            params.end_date,
            params.base_date,
            params.base_value
        );

        Ok(IndexSeries {
            params: params.clone(),
            points,
            input_fingerprint: fingerprint.finish(),
        })
    }
}

/// Price relative from `previous`'s basket to `snapshot`'s date.
///
/// Only the previous day's constituents that have a priced row in
/// `snapshot` contribute, and the result is divided by the sum of their
/// weights, so a missing constituent's weight goes pro rata to the rest.
/// No price is carried forward, and coins new on `snapshot`'s date play no
/// part until the next link. Fails when no constituent survives.
fn chain_relative(previous: &Basket, snapshot: &DailySnapshot) -> Result<f64, IndexError> {
    let mut weighted = 0.0;
    let mut weight = 0.0;
    for c in &previous.constituents {
        let Some(row) = snapshot.get(&c.coin_id).filter(|r| is_priced(r)) else {
            continue;
        };
        weighted += c.weight * row.price / c.price;
        weight += c.weight;
    }
    if weight <= 0.0 {
        return Err(IndexError::BrokenChain {
            date: snapshot.date(),
            previous: previous.date,
        });
    }
    Ok(weighted / weight)
}

/// Turn day-over-day relatives into levels anchored at the base date.
/// `relatives[k]` links day `k` to day `k + 1`.
fn anchor(params: &IndexParams, relatives: &[f64]) -> Vec<f64> {
    let n = relatives.len() + 1;
    let base = (params.base_date - params.start_date).num_days() as usize;
    let mut values = vec![0.0; n];
    values[base] = params.base_value;
    for k in base + 1..n {
        values[k] = values[k - 1] * relatives[k - 1];
    }
    for k in (0..base).rev() {
        values[k] = values[k + 1] / relatives[k];
    }
    values
}
