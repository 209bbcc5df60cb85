//! Daily constituent selection and weighting.

use crate::classification::{Classify, EligibilityFilter};
use crate::domain::{Constituent, DailySnapshot, MarketRow};

/// Whether a row can enter the basket at all, before classification.
pub fn is_priced(row: &MarketRow) -> bool {
    row.price > 0.0 && row.market_cap > 0.0
}

/// Select the first `top_n` eligible rows by rank and weight them by market cap.
///
/// Rank here is rank within the eligible set: an excluded coin does not use
/// up a slot. Fewer than `top_n` eligible rows yields a smaller basket.
pub fn select_constituents(
    snapshot: &DailySnapshot,
    classifier: &dyn Classify,
    filter: EligibilityFilter,
    top_n: usize,
) -> Vec<Constituent> {
    let selected: Vec<&MarketRow> = snapshot
        .rows()
        .iter()
        .filter(|row| is_priced(row))
        .filter(|row| filter.admits(&classifier.classify(&row.coin_id)))
        .take(top_n)
        .collect();

    let total: f64 = selected.iter().map(|r| r.market_cap).sum();
    selected
        .into_iter()
        .map(|r| Constituent {
            coin_id: r.coin_id.clone(),
            rank: r.rank,
            price: r.price,
            market_cap: r.market_cap,
            weight: r.market_cap / total,
        })
        .collect()
}
