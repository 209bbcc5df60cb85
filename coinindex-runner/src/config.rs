//! TOML configuration for the pipeline.
//!
//! Every field has a default, so a missing file or a missing table still
//! yields a working configuration:
//!
//! ```toml
//! [storage]
//! backend = "sqlite"
//! sqlite_path = "data/market.db"
//!
//! [updater]
//! top_k = 1000
//! max_workers = 3
//!
//! [index]
//! top_n = 30
//! base_value = 1000.0
//!
//! [quality]
//! max_days_old = 2
//! ```

use chrono::NaiveDate;
use coinindex_core::domain::IndexParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Which snapshot backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Flat,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Root of the `{YYYY}/{MM}/{date}.csv` tree.
    pub snapshots_dir: PathBuf,
    pub sqlite_path: PathBuf,
    pub universe_path: PathBuf,
    /// One `{coin_id}.json` category file per coin.
    pub metadata_dir: PathBuf,
    pub history_dir: PathBuf,
    /// Append-only JSONL log of downloads and merges.
    pub oplog_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Flat,
            snapshots_dir: PathBuf::from("data/daily"),
            sqlite_path: PathBuf::from("data/market.db"),
            universe_path: PathBuf::from("data/universe.json"),
            metadata_dir: PathBuf::from("data/metadata"),
            history_dir: PathBuf::from("data/history"),
            oplog_path: PathBuf::from("data/oplog.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Size of the market listing to diff against the universe. Larger than
    /// the tracked set so coins hovering at the edge are not missed.
    pub top_k: usize,
    pub max_workers: usize,
    /// Earliest date to backfill from when the store is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_start: Option<NaiveDate>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            top_k: 1000,
            max_workers: 3,
            history_start: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub top_n: usize,
    pub base_value: f64,
    pub exclude_stablecoins: bool,
    pub exclude_wrapped: bool,
    pub output_dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            top_n: 30,
            base_value: 1000.0,
            exclude_stablecoins: true,
            exclude_wrapped: true,
            output_dir: PathBuf::from("reports"),
        }
    }
}

impl IndexConfig {
    /// Index parameters for a range, with the base on `base_date` or `start`.
    pub fn params(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        base_date: Option<NaiveDate>,
    ) -> IndexParams {
        IndexParams::new(start, end)
            .with_base(base_date.unwrap_or(start), self.base_value)
            .with_top_n(self.top_n)
            .with_exclusions(self.exclude_stablecoins, self.exclude_wrapped)
    }
}

/// Thresholds for the cached-history quality check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Fewer rows than this is insufficient data, unless the coin is new.
    pub min_rows: usize,
    /// A series whose last row is older than this many days is outdated.
    pub max_days_old: i64,
    /// Coins spanning fewer days than this are treated as newly listed.
    pub min_data_span_days: i64,
    /// Staleness allowance for newly listed coins.
    pub new_coin_max_days_old: i64,
    /// A hole longer than this many days between rows is an interval issue.
    pub max_gap_days: i64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_rows: 100,
            max_days_old: 2,
            min_data_span_days: 30,
            new_coin_max_days_old: 7,
            max_gap_days: 7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub updater: UpdaterConfig,
    pub index: IndexConfig,
    pub quality: QualityConfig,
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            log::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.updater.top_k == 0 {
            return invalid("updater.top_k", "must be at least 1");
        }
        if self.updater.max_workers == 0 {
            return invalid("updater.max_workers", "must be at least 1");
        }
        if self.index.top_n == 0 {
            return invalid("index.top_n", "must be at least 1");
        }
        if !self.index.base_value.is_finite() || self.index.base_value <= 0.0 {
            return invalid("index.base_value", "must be a positive number");
        }
        let q = &self.quality;
        if q.max_days_old < 0 || q.new_coin_max_days_old < 0 || q.min_data_span_days < 0 {
            return invalid("quality", "day thresholds must not be negative");
        }
        if q.max_gap_days < 1 {
            return invalid("quality.max_gap_days", "must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.storage.backend, Backend::Flat);
        assert_eq!(config.updater.top_k, 1000);
        assert_eq!(config.index.top_n, 30);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [storage]
            backend = "sqlite"

            [updater]
            max_workers = 8
            history_start = "2024-01-01"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, Backend::Sqlite);
        assert_eq!(config.storage.sqlite_path, PathBuf::from("data/market.db"));
        assert_eq!(config.updater.max_workers, 8);
        assert_eq!(config.updater.top_k, 1000);
        assert_eq!(
            config.updater.history_start,
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
    }

    #[test]
    fn rejects_zero_workers() {
        let err = AppConfig::from_toml("[updater]\nmax_workers = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "updater.max_workers",
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(matches!(
            AppConfig::from_toml("[storage]\nbackend = \"postgres\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = AppConfig::default();
        config.index.exclude_wrapped = false;
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn quality_thresholds_default_and_validate() {
        let config = AppConfig::from_toml("[quality]\nmin_rows = 50\n").unwrap();
        assert_eq!(config.quality.min_rows, 50);
        assert_eq!(config.quality.max_days_old, 2);
        assert_eq!(config.quality.max_gap_days, 7);

        let err = AppConfig::from_toml("[quality]\nmax_gap_days = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "quality.max_gap_days",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn index_params_use_configured_base() {
        let index = IndexConfig::default();
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let params = index.params(start, end, None);
        assert_eq!(params.base_date, start);
        assert_eq!(params.base_value, 1000.0);
        assert_eq!(params.top_n, 30);
        assert!(params.validate().is_ok());
    }
}
