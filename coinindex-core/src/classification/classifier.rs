use super::rules::evaluate;
use super::{Classify, TaxonomySource, Verdict};
use crate::fingerprint::metadata_fingerprint;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

struct Cached {
    /// `None` when the coin had no metadata.
    source: Option<[u8; 32]>,
    verdict: Verdict,
}

/// The canonical classifier: verdicts from a [`TaxonomySource`], cached per
/// coin id together with a fingerprint of the name and tags they came from.
pub struct Classifier<S> {
    source: S,
    cache: RwLock<HashMap<String, Cached>>,
}

impl<S: TaxonomySource> Classifier<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn compute(&self, coin_id: &str) -> Cached {
        match self.source.metadata(coin_id) {
            Ok(Some(meta)) => Cached {
                source: Some(metadata_fingerprint(meta.name.as_deref(), &meta.categories)),
                verdict: evaluate(&meta),
            },
            Ok(None) => {
                log::warn!("classification unknown for '{coin_id}': no metadata, treating as native");
                Cached {
                    source: None,
                    verdict: Verdict::unknown(coin_id),
                }
            }
            Err(e) => {
                log::warn!("classification unknown for '{coin_id}': {e}; treating as native");
                Cached {
                    source: None,
                    verdict: Verdict::unknown(coin_id),
                }
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<S: TaxonomySource> Classify for Classifier<S> {
    fn classify(&self, coin_id: &str) -> Verdict {
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(coin_id)
        {
            return hit.verdict.clone();
        }

        let computed = self.compute(coin_id);
        let verdict = computed.verdict.clone();
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(coin_id.to_string())
            .or_insert(computed);
        verdict
    }

    /// Re-read the coin's metadata and recompute its verdict if the name or
    /// the tags changed.
    fn refresh(&self, coin_id: &str) -> bool {
        let fresh = self.compute(coin_id);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        match cache.get(coin_id) {
            Some(old) if old.source == fresh.source => false,
            _ => {
                log::debug!("verdict for '{coin_id}' recomputed: {}", fresh.verdict.label());
                cache.insert(coin_id.to_string(), fresh);
                true
            }
        }
    }

    fn invalidate(&self, coin_id: &str) -> bool {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(coin_id)
            .is_some()
    }
}
