//! External market data: the history provider contract, its CoinGecko
//! implementation and the per-coin Parquet history cache.

pub mod cache;
pub mod coingecko;
pub mod provider;

pub use cache::{Coverage, HistoryCache, HistoryCacheError, HistoryMeta};
pub use coingecko::CoinGeckoProvider;
pub use provider::{sanitize_history, FetchError, HistoryPoint, HistoryProvider, MarketListing};
