//! Authoritative category metadata sources. Read-only from the engine's side.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// Category metadata for one coin as published by the taxonomy provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinMetadata {
    pub id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "skip_null_tags")]
    pub categories: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

// the provider occasionally emits `null` inside the category list
fn skip_null_tags<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let raw: Option<Vec<Option<String>>> = Option::deserialize(d)?;
    Ok(raw.unwrap_or_default().into_iter().flatten().collect())
}

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("metadata for '{coin_id}' at {}: {source}", .path.display())]
    Io {
        coin_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata for '{coin_id}' at {} is not valid JSON: {source}", .path.display())]
    Parse {
        coin_id: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read-only mapping from coin id to category tags.
pub trait TaxonomySource: Send + Sync {
    /// `Ok(None)` when the source has no entry for the coin.
    fn metadata(&self, coin_id: &str) -> Result<Option<CoinMetadata>, TaxonomyError>;
}

/// One JSON document per coin: `{dir}/{coin_id}.json`.
pub struct MetadataDir {
    dir: PathBuf,
}

impl MetadataDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, coin_id: &str) -> PathBuf {
        self.dir.join(format!("{coin_id}.json"))
    }
}

impl TaxonomySource for MetadataDir {
    fn metadata(&self, coin_id: &str) -> Result<Option<CoinMetadata>, TaxonomyError> {
        let path = self.path_for(coin_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(TaxonomyError::Io {
                    coin_id: coin_id.to_string(),
                    path,
                    source,
                })
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| TaxonomyError::Parse {
                coin_id: coin_id.to_string(),
                path,
                source,
            })
    }
}

/// In-memory taxonomy, refreshed by its owner.
#[derive(Default)]
pub struct StaticTaxonomy {
    entries: RwLock<HashMap<String, CoinMetadata>>,
}

impl StaticTaxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a coin's metadata.
    pub fn upsert(&self, meta: CoinMetadata) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(meta.id.clone(), meta);
    }

    /// Shorthand for tests and fixtures.
    pub fn with_tags(self, coin_id: &str, tags: &[&str]) -> Self {
        self.upsert(CoinMetadata {
            id: coin_id.to_string(),
            symbol: String::new(),
            name: None,
            categories: tags.iter().map(|t| t.to_string()).collect(),
            last_updated: None,
        });
        self
    }
}

impl FromIterator<CoinMetadata> for StaticTaxonomy {
    fn from_iter<I: IntoIterator<Item = CoinMetadata>>(iter: I) -> Self {
        let taxonomy = Self::new();
        for meta in iter {
            taxonomy.upsert(meta);
        }
        taxonomy
    }
}

impl TaxonomySource for StaticTaxonomy {
    fn metadata(&self, coin_id: &str) -> Result<Option<CoinMetadata>, TaxonomyError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(coin_id)
            .cloned())
    }
}
