//! Per-coin history cache in Parquet with Hive-style partitioning.
//!
//! Layout: `{dir}/coin={id}/{year}.parquet` plus a `meta.json` sidecar.
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Writes merge with what is already cached; newer points win per date
//! - Integrity validation on load (schema check, row count > 0)
//! - Corrupt partitions are quarantined as `{year}.parquet.quarantined`

use super::provider::HistoryPoint;
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const COLUMNS: [&str; 4] = ["date", "price", "volume", "market_cap"];

#[derive(Debug, Error)]
pub enum HistoryCacheError {
    #[error("no cached history for '{coin_id}'")]
    NoCachedData { coin_id: String },

    #[error("nothing to cache for '{coin_id}'")]
    Empty { coin_id: String },

    #[error("cache I/O at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet {}: {reason}", .path.display())]
    Parquet { path: PathBuf, reason: String },

    #[error("invalid cache file {}: {reason}", .path.display())]
    Validation { path: PathBuf, reason: String },

    #[error("cache metadata for '{coin_id}': {source}")]
    Meta {
        coin_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Metadata sidecar for a cached coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMeta {
    pub coin_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub point_count: usize,
    pub data_hash: String,
    pub source: String,
    pub cached_at: chrono::NaiveDateTime,
    /// Earliest date a fetch asked the provider for. The provider had
    /// nothing between this and `start_date`, so that span counts as covered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covered_from: Option<NaiveDate>,
}

impl HistoryMeta {
    /// First date the cache can answer for.
    pub fn coverage_start(&self) -> NaiveDate {
        self.covered_from
            .map_or(self.start_date, |from| from.min(self.start_date))
    }
}

/// How well the cache covers a requested date range.
#[derive(Debug, Clone, PartialEq)]
pub enum Coverage {
    NotCached,
    Full,
    Partial {
        cached_start: NaiveDate,
        cached_end: NaiveDate,
    },
}

#[derive(Debug, Clone)]
pub struct HistoryCache {
    dir: PathBuf,
}

impl HistoryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/coin={id}/`
    fn coin_dir(&self, coin_id: &str) -> PathBuf {
        self.dir.join(format!("coin={coin_id}"))
    }

    fn year_path(&self, coin_id: &str, year: i32) -> PathBuf {
        self.coin_dir(coin_id).join(format!("{year}.parquet"))
    }

    fn meta_path(&self, coin_id: &str) -> PathBuf {
        self.coin_dir(coin_id).join("meta.json")
    }

    /// Every coin with a cache directory, sorted.
    pub fn coin_ids(&self) -> Result<Vec<String>, HistoryCacheError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let io_err = |source| HistoryCacheError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let id = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("coin="));
            if let (true, Some(id)) = (path.is_dir(), id) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Merge `points` into the cached series for a coin.
    ///
    /// Only the year partitions touched by `points` are rewritten.
    pub fn store(
        &self,
        coin_id: &str,
        points: &[HistoryPoint],
        source: &str,
    ) -> Result<HistoryMeta, HistoryCacheError> {
        self.write_points(coin_id, points, source, None)
    }

    /// Like [`store`](Self::store), for the answer to a fetch that started
    /// at `requested_start`. A series beginning later than that means the
    /// coin has no earlier history, and coverage reflects it.
    pub fn store_fetched(
        &self,
        coin_id: &str,
        points: &[HistoryPoint],
        source: &str,
        requested_start: NaiveDate,
    ) -> Result<HistoryMeta, HistoryCacheError> {
        self.write_points(coin_id, points, source, Some(requested_start))
    }

    fn write_points(
        &self,
        coin_id: &str,
        points: &[HistoryPoint],
        source: &str,
        requested_start: Option<NaiveDate>,
    ) -> Result<HistoryMeta, HistoryCacheError> {
        if points.is_empty() {
            return Err(HistoryCacheError::Empty {
                coin_id: coin_id.to_string(),
            });
        }

        let coin_dir = self.coin_dir(coin_id);
        fs::create_dir_all(&coin_dir).map_err(|source| HistoryCacheError::Io {
            path: coin_dir.clone(),
            source,
        })?;

        let covered_from = self
            .meta(coin_id)
            .and_then(|m| m.covered_from)
            .into_iter()
            .chain(requested_start)
            .min();
        let mut merged: BTreeMap<NaiveDate, HistoryPoint> = match self.load(coin_id) {
            Ok(existing) => existing.into_iter().map(|p| (p.date, p)).collect(),
            Err(HistoryCacheError::NoCachedData { .. }) => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        let mut touched = HashSet::new();
        for p in points {
            touched.insert(p.date.year());
            merged.insert(p.date, p.clone());
        }

        let mut by_year: HashMap<i32, Vec<&HistoryPoint>> = HashMap::new();
        for p in merged.values() {
            if touched.contains(&p.date.year()) {
                by_year.entry(p.date.year()).or_default().push(p);
            }
        }

        for (year, year_points) in &by_year {
            let path = self.year_path(coin_id, *year);
            let tmp_path = path.with_extension("parquet.tmp");
            let df = points_to_dataframe(year_points, &path)?;
            write_parquet(&df, &tmp_path)?;
            fs::rename(&tmp_path, &path).map_err(|source| {
                let _ = fs::remove_file(&tmp_path);
                HistoryCacheError::Io {
                    path: path.clone(),
                    source,
                }
            })?;
        }

        let all: Vec<&HistoryPoint> = merged.values().collect();
        let hash_input = serde_json::to_vec(&all).map_err(|source| HistoryCacheError::Meta {
            coin_id: coin_id.to_string(),
            source,
        })?;
        let (Some(first), Some(last)) = (all.first(), all.last()) else {
            return Err(HistoryCacheError::Empty {
                coin_id: coin_id.to_string(),
            });
        };
        let meta = HistoryMeta {
            coin_id: coin_id.to_string(),
            start_date: first.date,
            end_date: last.date,
            point_count: all.len(),
            data_hash: blake3::hash(&hash_input).to_hex().to_string(),
            source: source.to_string(),
            cached_at: chrono::Local::now().naive_local(),
            covered_from,
        };
        let meta_json =
            serde_json::to_string_pretty(&meta).map_err(|source| HistoryCacheError::Meta {
                coin_id: coin_id.to_string(),
                source,
            })?;
        let meta_path = self.meta_path(coin_id);
        fs::write(&meta_path, meta_json).map_err(|source| HistoryCacheError::Io {
            path: meta_path,
            source,
        })?;

        Ok(meta)
    }

    /// All cached points for a coin, ascending by date.
    pub fn load(&self, coin_id: &str) -> Result<Vec<HistoryPoint>, HistoryCacheError> {
        let coin_dir = self.coin_dir(coin_id);
        if !coin_dir.exists() {
            return Err(HistoryCacheError::NoCachedData {
                coin_id: coin_id.to_string(),
            });
        }

        let entries = fs::read_dir(&coin_dir).map_err(|source| HistoryCacheError::Io {
            path: coin_dir.clone(),
            source,
        })?;

        let mut points = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| HistoryCacheError::Io {
                    path: coin_dir.clone(),
                    source,
                })?
                .path();

            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }

            match load_and_validate_parquet(&path) {
                Ok(year_points) => points.extend(year_points),
                Err(e) => {
                    let quarantine = path.with_extension("parquet.quarantined");
                    log::warn!("quarantining corrupt cache file {}: {e}", path.display());
                    let _ = fs::rename(&path, &quarantine);
                }
            }
        }

        if points.is_empty() {
            return Err(HistoryCacheError::NoCachedData {
                coin_id: coin_id.to_string(),
            });
        }

        points.sort_by_key(|p| p.date);
        Ok(points)
    }

    /// Cached points within `start..=end`.
    pub fn load_range(
        &self,
        coin_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, HistoryCacheError> {
        Ok(self
            .load(coin_id)?
            .into_iter()
            .filter(|p| p.date >= start && p.date <= end)
            .collect())
    }

    pub fn meta(&self, coin_id: &str) -> Option<HistoryMeta> {
        let content = fs::read_to_string(self.meta_path(coin_id)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn coverage(&self, coin_id: &str, start: NaiveDate, end: NaiveDate) -> Coverage {
        match self.meta(coin_id) {
            None => Coverage::NotCached,
            Some(meta) if meta.coverage_start() <= start && meta.end_date >= end => Coverage::Full,
            Some(meta) => Coverage::Partial {
                cached_start: meta.start_date,
                cached_end: meta.end_date,
            },
        }
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn points_to_dataframe(
    points: &[&HistoryPoint],
    path: &Path,
) -> Result<DataFrame, HistoryCacheError> {
    let err = |reason: String| HistoryCacheError::Parquet {
        path: path.to_path_buf(),
        reason,
    };
    let dates: Vec<i32> = points
        .iter()
        .map(|p| (p.date - epoch()).num_days() as i32)
        .collect();
    let prices: Vec<f64> = points.iter().map(|p| p.price).collect();
    let volumes: Vec<f64> = points.iter().map(|p| p.volume).collect();
    let caps: Vec<f64> = points.iter().map(|p| p.market_cap).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| err(format!("date cast: {e}")))?,
        Column::new("price".into(), prices),
        Column::new("volume".into(), volumes),
        Column::new("market_cap".into(), caps),
    ])
    .map_err(|e| err(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), HistoryCacheError> {
    let file = fs::File::create(path).map_err(|source| HistoryCacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| HistoryCacheError::Parquet {
            path: path.to_path_buf(),
            reason: format!("write: {e}"),
        })?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<HistoryPoint>, HistoryCacheError> {
    let parquet_err = |reason: String| HistoryCacheError::Parquet {
        path: path.to_path_buf(),
        reason,
    };
    let invalid = |reason: String| HistoryCacheError::Validation {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(path).map_err(|source| HistoryCacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| parquet_err(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(invalid("empty parquet file".into()));
    }
    for name in COLUMNS {
        if df.column(name).is_err() {
            return Err(invalid(format!("missing column '{name}'")));
        }
    }

    let column = |name: &str| df.column(name).map_err(|e| parquet_err(e.to_string()));
    let dates = column("date")?
        .date()
        .map_err(|e| invalid(format!("date column type: {e}")))?;
    let prices = column("price")?
        .f64()
        .map_err(|e| invalid(format!("price column type: {e}")))?;
    let volumes = column("volume")?
        .f64()
        .map_err(|e| invalid(format!("volume column type: {e}")))?;
    let caps = column("market_cap")?
        .f64()
        .map_err(|e| invalid(format!("market_cap column type: {e}")))?;

    let mut points = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = dates
            .get(i)
            .ok_or_else(|| invalid(format!("null date at row {i}")))?;
        let (Some(price), Some(market_cap)) = (prices.get(i), caps.get(i)) else {
            return Err(invalid(format!("null price or market cap at row {i}")));
        };
        points.push(HistoryPoint {
            date: epoch() + chrono::Duration::days(days as i64),
            price,
            volume: volumes.get(i).unwrap_or(0.0),
            market_cap,
        });
    }
    Ok(points)
}
