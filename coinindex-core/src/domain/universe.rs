//! The canonical coin universe: an append-only registry of every coin ever
//! observed in a snapshot.
//!
//! The registry is a plain value. The updater takes one in and hands a grown
//! one back; nothing holds it globally.

use crate::data::MarketListing;
use crate::store::{SnapshotStore, StoreError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Whether a coin's history has been backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillState {
    Complete,
    /// The provider reported the coin as not found, or had no history for it.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinRecord {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub first_seen: NaiveDate,
    pub backfill: BackfillState,
}

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("universe file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("universe file {} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("scanning snapshots: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinUniverse {
    coins: BTreeMap<String, CoinRecord>,
}

impl CoinUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.coins.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CoinRecord> {
        self.coins.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoinRecord> {
        self.coins.values()
    }

    /// Add a record. Returns `false` (and leaves the registry unchanged) when
    /// the id is already known.
    pub fn register(&mut self, record: CoinRecord) -> bool {
        if self.coins.contains_key(&record.id) {
            return false;
        }
        self.coins.insert(record.id.clone(), record);
        true
    }

    /// Listings whose id is not yet registered, in listing order.
    /// Duplicate ids within the listing are reported once.
    pub fn diff<'a>(&self, listings: &'a [MarketListing]) -> Vec<&'a MarketListing> {
        let mut seen = HashSet::new();
        listings
            .iter()
            .filter(|l| !self.contains(&l.coin_id) && seen.insert(l.coin_id.as_str()))
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self, UniverseError> {
        let content = fs::read_to_string(path).map_err(|source| UniverseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| UniverseError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the registry, or start empty if the file does not exist yet.
    pub fn load_or_empty(path: &Path) -> Result<Self, UniverseError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Write as pretty JSON via a temporary sibling and rename.
    pub fn save(&self, path: &Path) -> Result<(), UniverseError> {
        let io_err = |source| UniverseError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| UniverseError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_err(e)
        })
    }

    /// Rebuild a registry from every finalized snapshot in a store.
    /// A coin's first-seen date is the earliest snapshot that contains it.
    pub fn from_store(store: &dyn SnapshotStore) -> Result<Self, UniverseError> {
        let mut universe = Self::new();
        for date in store.dates()? {
            for row in store.read_rows(date)? {
                universe.register(CoinRecord {
                    id: row.coin_id,
                    symbol: row.symbol,
                    name: None,
                    first_seen: date,
                    backfill: BackfillState::Complete,
                });
            }
        }
        Ok(universe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, first_seen: &str) -> CoinRecord {
        CoinRecord {
            id: id.into(),
            symbol: id.to_uppercase(),
            name: Some(id.into()),
            first_seen: first_seen.parse().unwrap(),
            backfill: BackfillState::Complete,
        }
    }

    fn listing(id: &str, rank: u32) -> MarketListing {
        MarketListing {
            coin_id: id.into(),
            symbol: id.to_uppercase(),
            name: id.into(),
            price: 1.0,
            volume: 1.0,
            market_cap: 100.0 / rank as f64,
            rank,
        }
    }

    #[test]
    fn register_never_overwrites() {
        let mut u = CoinUniverse::new();
        assert!(u.register(record("bitcoin", "2024-01-01")));
        assert!(!u.register(record("bitcoin", "2025-06-01")));
        assert_eq!(
            u.get("bitcoin").unwrap().first_seen,
            "2024-01-01".parse::<NaiveDate>().unwrap()
        );
        assert_eq!(u.len(), 1);
    }

    #[test]
    fn diff_keeps_listing_order_and_skips_known() {
        let mut u = CoinUniverse::new();
        u.register(record("bitcoin", "2024-01-01"));

        let listings = vec![
            listing("bitcoin", 1),
            listing("solana", 2),
            listing("aave", 3),
            listing("solana", 4),
        ];
        let ids: Vec<&str> = u.diff(&listings).iter().map(|l| l.coin_id.as_str()).collect();
        assert_eq!(ids, vec!["solana", "aave"]);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("universe.json");

        let mut u = CoinUniverse::new();
        u.register(record("bitcoin", "2024-01-01"));
        u.register(CoinRecord {
            backfill: BackfillState::Unavailable,
            ..record("ghost", "2024-02-01")
        });
        u.save(&path).unwrap();

        let loaded = CoinUniverse::load(&path).unwrap();
        assert_eq!(loaded, u);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let u = CoinUniverse::load_or_empty(&dir.path().join("nope.json")).unwrap();
        assert!(u.is_empty());
    }
}
