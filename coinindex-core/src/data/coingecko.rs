//! CoinGecko history provider (blocking HTTP).
//!
//! `/coins/markets` for the ranking, `/coins/{id}/market_chart/range` for a
//! coin's history. Intraday observations are folded to one point per UTC date,
//! the last observation of the day winning. No retries: a 429, 5xx or network
//! error surfaces as `FetchError::Transient` and the caller decides.

use super::provider::{FetchError, HistoryPoint, HistoryProvider, MarketListing};
use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const BASE_URL: &str = "https://api.coingecko.com/api/v3";
const PAGE_SIZE: usize = 250;
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

#[derive(Debug, Deserialize)]
struct MarketEntry {
    id: String,
    symbol: String,
    name: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    market_cap_rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MarketChart {
    prices: Vec<(f64, Option<f64>)>,
    market_caps: Vec<(f64, Option<f64>)>,
    total_volumes: Vec<(f64, Option<f64>)>,
}

pub struct CoinGeckoProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CoinGeckoProvider {
    pub fn new(api_key: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("coinindex/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            api_key,
        })
    }

    /// Reads the API key from `COINGECKO_API_KEY` when set.
    pub fn from_env() -> Result<Self, reqwest::Error> {
        Self::new(std::env::var("COINGECKO_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn get<T: serde::de::DeserializeOwned>(
        &self,
        target: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let mut request = self.client.get(url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let resp = request.send().map_err(|e| FetchError::Transient {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                coin_id: target.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Transient {
                target: target.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        resp.json().map_err(|e| FetchError::ResponseFormatChanged {
            target: target.to_string(),
            reason: e.to_string(),
        })
    }
}

impl HistoryProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        "coingecko"
    }

    fn top_markets(&self, k: usize) -> Result<Vec<MarketListing>, FetchError> {
        let url = format!("{}/coins/markets", self.base_url);
        let mut listings = Vec::with_capacity(k);
        let pages = k.div_ceil(PAGE_SIZE);

        for page in 1..=pages {
            let entries: Vec<MarketEntry> = self.get(
                "markets",
                &url,
                &[
                    ("vs_currency", "usd".into()),
                    ("order", "market_cap_desc".into()),
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                    ("sparkline", "false".into()),
                ],
            )?;
            let short_page = entries.len() < PAGE_SIZE;

            for entry in entries {
                let position = listings.len() as u32 + 1;
                let (Some(price), Some(market_cap)) = (entry.current_price, entry.market_cap)
                else {
                    log::debug!("skipping listing '{}' without price or market cap", entry.id);
                    continue;
                };
                listings.push(MarketListing {
                    coin_id: entry.id,
                    symbol: entry.symbol.to_uppercase(),
                    name: entry.name,
                    price,
                    volume: entry.total_volume.unwrap_or(0.0),
                    market_cap,
                    rank: entry.market_cap_rank.unwrap_or(position),
                });
            }
            if short_page {
                break;
            }
        }

        listings.truncate(k);
        Ok(listings)
    }

    fn fetch_history(
        &self,
        coin_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, FetchError> {
        let from = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let to = end.and_time(NaiveTime::MIN).and_utc().timestamp() + 86_399;
        let url = format!("{}/coins/{coin_id}/market_chart/range", self.base_url);

        let chart: MarketChart = self.get(
            coin_id,
            &url,
            &[
                ("vs_currency", "usd".into()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ],
        )?;

        let points = parse_market_chart(coin_id, &chart)?;
        Ok(points
            .into_iter()
            .filter(|p| p.date >= start && p.date <= end)
            .collect())
    }
}

/// Fold a market chart into one point per UTC date.
pub(crate) fn parse_market_chart(
    coin_id: &str,
    chart: &MarketChart,
) -> Result<Vec<HistoryPoint>, FetchError> {
    let prices = last_per_day(coin_id, &chart.prices)?;
    let caps = last_per_day(coin_id, &chart.market_caps)?;
    let volumes = last_per_day(coin_id, &chart.total_volumes)?;

    Ok(prices
        .into_iter()
        .filter_map(|(date, price)| {
            let market_cap = *caps.get(&date)?;
            Some(HistoryPoint {
                date,
                price,
                volume: volumes.get(&date).copied().unwrap_or(0.0),
                market_cap,
            })
        })
        .collect())
}

fn last_per_day(
    coin_id: &str,
    series: &[(f64, Option<f64>)],
) -> Result<BTreeMap<NaiveDate, f64>, FetchError> {
    let mut latest: BTreeMap<NaiveDate, (i64, f64)> = BTreeMap::new();
    for &(ts, value) in series {
        let Some(value) = value else { continue };
        let ms = ts as i64;
        let date = DateTime::from_timestamp_millis(ms)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| FetchError::ResponseFormatChanged {
                target: coin_id.to_string(),
                reason: format!("invalid timestamp {ts}"),
            })?;
        match latest.get(&date) {
            Some(&(seen, _)) if seen > ms => {}
            _ => {
                latest.insert(date, (ms, value));
            }
        }
    }
    Ok(latest.into_iter().map(|(d, (_, v))| (d, v)).collect())
}
