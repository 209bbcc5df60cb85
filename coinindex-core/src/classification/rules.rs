//! Tag rules mapping authoritative categories to a verdict.

use super::{CoinMetadata, Confidence, Verdict};

/// Tags that mark a stablecoin on their own.
pub const STABLECOIN_TAGS: &[&str] = &[
    "Stablecoins",
    "USD Stablecoin",
    "Fiat-backed Stablecoin",
    "Algorithmic Stablecoin",
    "Euro Stablecoin",
];

/// Tags that mark a wrapped, bridged or liquid-staking derivative.
pub const WRAPPED_TAGS: &[&str] = &[
    "Wrapped-Tokens",
    "Liquid Staking Tokens",
    "Liquid Staked ETH",
    "Liquid Staking",
    "Tokenized BTC",
    "Crypto-Backed Tokens",
    "Bridged-Tokens",
];

/// Shared by derivatives and unrelated tokens alike; never decisive alone.
pub const AMBIGUOUS_TAGS: &[&str] = &["Staking", "Restaking", "Yield-Bearing Tokens"];

const DERIVATIVE_ID_PREFIXES: &[&str] = &[
    "staked-",
    "wrapped-",
    "bridged-",
    "restaked-",
    "liquid-staked-",
];

const DERIVATIVE_NAME_WORDS: &[&str] = &["staked", "wrapped", "bridged", "restaked"];

fn in_set(tag: &str, set: &[&str]) -> bool {
    set.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

pub fn is_stablecoin_tag(tag: &str) -> bool {
    in_set(tag, STABLECOIN_TAGS)
        || tag
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|w| w.eq_ignore_ascii_case("stablecoin") || w.eq_ignore_ascii_case("stablecoins"))
}

pub fn is_wrapped_tag(tag: &str) -> bool {
    in_set(tag, WRAPPED_TAGS)
}

pub fn is_ambiguous_tag(tag: &str) -> bool {
    in_set(tag, AMBIGUOUS_TAGS)
}

/// Whether an id or display name reads like a derivative of another asset.
pub fn looks_derivative(coin_id: &str, name: Option<&str>) -> bool {
    let id = coin_id.to_ascii_lowercase();
    if DERIVATIVE_ID_PREFIXES.iter().any(|p| id.starts_with(p)) {
        return true;
    }
    name.is_some_and(|n| {
        n.split_whitespace()
            .any(|w| DERIVATIVE_NAME_WORDS.iter().any(|k| w.eq_ignore_ascii_case(k)))
    })
}

/// Derive a verdict from a coin's authoritative metadata.
pub fn evaluate(meta: &CoinMetadata) -> Verdict {
    let stablecoin_tags: Vec<String> = meta
        .categories
        .iter()
        .filter(|t| is_stablecoin_tag(t))
        .cloned()
        .collect();
    let wrapped_tags: Vec<String> = meta
        .categories
        .iter()
        .filter(|t| is_wrapped_tag(t))
        .cloned()
        .collect();

    // narrowing only applies to coins without a definitive tag
    let narrowed = if stablecoin_tags.is_empty() && wrapped_tags.is_empty() {
        meta.categories
            .iter()
            .find(|t| is_ambiguous_tag(t))
            .filter(|_| looks_derivative(&meta.id, meta.name.as_deref()))
            .cloned()
    } else {
        None
    };

    Verdict {
        coin_id: meta.id.clone(),
        is_stablecoin: !stablecoin_tags.is_empty(),
        is_wrapped: !wrapped_tags.is_empty() || narrowed.is_some(),
        confidence: Confidence::Authoritative,
        stablecoin_tags,
        wrapped_tags,
        narrowed,
    }
}
