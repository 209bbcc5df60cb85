//! CoinIndex Runner: update orchestration, reports, configuration, export.
//!
//! This crate builds on `coinindex-core` to provide:
//! - The Incremental Updater (bounded worker pool, partial-success semantics)
//! - Update run reports and the JSONL operation log
//! - TOML configuration and the snapshot store factory
//! - Rank verification and rebuild over a date range
//! - Quality grading of cached coin histories
//! - CSV/JSON export of index series and classification results

pub mod config;
pub mod export;
pub mod maintenance;
pub mod report;
pub mod storage;
pub mod updater;

pub use config::{
    AppConfig, Backend, ConfigError, IndexConfig, QualityConfig, StorageConfig, UpdaterConfig,
};
pub use export::{
    export_classification_csv, export_constituents_csv, export_index_csv, export_index_json,
    save_index_artifacts, save_update_report,
};
pub use maintenance::{
    check_history_quality, rebuild_ranks, verify_ranks, CoinQuality, QualityError, QualityIssue,
    QualityReport, RankAudit, RankRebuild,
};
pub use report::{
    BackfillFailure, DateMerge, EntrantOutcome, MergeFailure, OperationLog, OperationRecord,
    UpdateReport, UpdateStatus,
};
pub use storage::open_store;
pub use updater::{IncrementalUpdater, UpdateError, UpdateOptions, UpdateOutcome};
