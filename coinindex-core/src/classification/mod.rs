//! Classification Engine: native / stablecoin / wrapped-or-derivative.
//!
//! Verdicts come from an authoritative category taxonomy ([`TaxonomySource`]).
//! A local id/name heuristic may only narrow an ambiguous tag such as
//! `Staking` towards wrapped; it never overrides a definitive tag. A coin with
//! no metadata is native, with a logged warning and `Confidence::Unknown`.

pub mod classifier;
pub mod rules;
pub mod taxonomy;

pub use classifier::Classifier;
pub use taxonomy::{CoinMetadata, MetadataDir, StaticTaxonomy, TaxonomyError, TaxonomySource};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Derived from the coin's authoritative category tags.
    Authoritative,
    /// No metadata was available; the coin defaults to native.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub coin_id: String,
    pub is_stablecoin: bool,
    pub is_wrapped: bool,
    pub confidence: Confidence,
    /// Tags that made the coin a stablecoin.
    pub stablecoin_tags: Vec<String>,
    /// Tags that made the coin wrapped/derivative.
    pub wrapped_tags: Vec<String>,
    /// Ambiguous tag narrowed to wrapped by the id/name heuristic.
    pub narrowed: Option<String>,
}

impl Verdict {
    /// The default for a coin with no classification data.
    pub fn unknown(coin_id: &str) -> Self {
        Self {
            coin_id: coin_id.to_string(),
            is_stablecoin: false,
            is_wrapped: false,
            confidence: Confidence::Unknown,
            stablecoin_tags: Vec::new(),
            wrapped_tags: Vec::new(),
            narrowed: None,
        }
    }

    pub fn is_native(&self) -> bool {
        !self.is_stablecoin && !self.is_wrapped
    }

    pub fn label(&self) -> &'static str {
        match (self.is_stablecoin, self.is_wrapped) {
            (false, false) => "native",
            (true, false) => "stablecoin",
            (false, true) => "wrapped",
            (true, true) => "stablecoin+wrapped",
        }
    }
}

/// Which classes are excluded from index eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EligibilityFilter {
    pub exclude_stablecoins: bool,
    pub exclude_wrapped: bool,
}

impl EligibilityFilter {
    pub fn new(exclude_stablecoins: bool, exclude_wrapped: bool) -> Self {
        Self {
            exclude_stablecoins,
            exclude_wrapped,
        }
    }

    pub fn admits(&self, verdict: &Verdict) -> bool {
        !(self.exclude_stablecoins && verdict.is_stablecoin
            || self.exclude_wrapped && verdict.is_wrapped)
    }
}

/// Counts over a set of coins. The categories partition `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub total: usize,
    pub native: usize,
    pub stablecoin: usize,
    pub wrapped: usize,
    pub both: usize,
    pub unknown: usize,
}

/// The classification capability. [`Classifier`] is the one implementation;
/// tests may supply their own.
pub trait Classify: Send + Sync {
    fn classify(&self, coin_id: &str) -> Verdict;

    /// Recompute a cached verdict if its inputs changed. Returns `true` when
    /// the verdict was replaced. Uncached implementations have nothing to do.
    fn refresh(&self, _coin_id: &str) -> bool {
        false
    }

    /// Drop one cached verdict; the next `classify` recomputes it.
    fn invalidate(&self, _coin_id: &str) -> bool {
        false
    }

    fn classify_many(&self, coin_ids: &[&str]) -> HashMap<String, Verdict> {
        coin_ids
            .iter()
            .map(|id| (id.to_string(), self.classify(id)))
            .collect()
    }

    fn is_native(&self, coin_id: &str) -> bool {
        self.classify(coin_id).is_native()
    }

    /// Ids admitted by `filter`, in input order.
    fn filter_eligible(&self, coin_ids: &[&str], filter: EligibilityFilter) -> Vec<String> {
        coin_ids
            .iter()
            .filter(|id| filter.admits(&self.classify(id)))
            .map(|id| id.to_string())
            .collect()
    }

    fn summary(&self, coin_ids: &[&str]) -> ClassificationSummary {
        let mut s = ClassificationSummary::default();
        for id in coin_ids {
            let v = self.classify(id);
            s.total += 1;
            match (v.confidence, v.is_stablecoin, v.is_wrapped) {
                (Confidence::Unknown, _, _) => s.unknown += 1,
                (_, false, false) => s.native += 1,
                (_, true, false) => s.stablecoin += 1,
                (_, false, true) => s.wrapped += 1,
                (_, true, true) => s.both += 1,
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(stable: bool, wrapped: bool) -> Verdict {
        Verdict {
            is_stablecoin: stable,
            is_wrapped: wrapped,
            confidence: Confidence::Authoritative,
            ..Verdict::unknown("x")
        }
    }

    #[test]
    fn filter_admits_by_flags() {
        let none = EligibilityFilter::default();
        let both = EligibilityFilter::new(true, true);
        let stable_only = EligibilityFilter::new(true, false);

        assert!(none.admits(&verdict(true, true)));
        assert!(!both.admits(&verdict(true, false)));
        assert!(!both.admits(&verdict(false, true)));
        assert!(both.admits(&verdict(false, false)));
        assert!(stable_only.admits(&verdict(false, true)));
        assert!(!stable_only.admits(&verdict(true, true)));
    }

    #[test]
    fn labels() {
        assert_eq!(verdict(false, false).label(), "native");
        assert_eq!(verdict(true, true).label(), "stablecoin+wrapped");
        assert!(Verdict::unknown("new-coin").is_native());
    }
}
