//! Domain types: market rows, daily snapshots, the coin universe and index output.

pub mod index;
pub mod snapshot;
pub mod universe;

pub use index::{Constituent, IndexParams, IndexPoint, IndexSeries};
pub use snapshot::{rank_order, rebuild_ranks, DailySnapshot, MarketRow, RankViolation};
pub use universe::{BackfillState, CoinRecord, CoinUniverse, UniverseError};
