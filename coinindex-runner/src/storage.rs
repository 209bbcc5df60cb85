//! Store factory: turns the `[storage]` table into a snapshot backend.

use std::sync::Arc;

use coinindex_core::store::{FlatFileStore, SnapshotStore, SqliteStore, StoreError};

use crate::config::{Backend, StorageConfig};

pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn SnapshotStore>, StoreError> {
    let store: Arc<dyn SnapshotStore> = match config.backend {
        Backend::Flat => Arc::new(FlatFileStore::new(&config.snapshots_dir)),
        Backend::Sqlite => Arc::new(SqliteStore::open(&config.sqlite_path)?),
    };
    log::debug!("opened {} snapshot store", store.name());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_configured_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig {
            snapshots_dir: dir.path().join("daily"),
            sqlite_path: dir.path().join("db/market.db"),
            ..StorageConfig::default()
        };

        assert_eq!(open_store(&config).unwrap().name(), "flat");

        config.backend = Backend::Sqlite;
        assert_eq!(open_store(&config).unwrap().name(), "sqlite");
        assert!(dir.path().join("db/market.db").exists());
    }
}
