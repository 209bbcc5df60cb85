//! Deterministic blake3 fingerprints over snapshot inputs and category tag sets.
//!
//! Floats are hashed by bit pattern and strings are length-prefixed, so the
//! digest is independent of any text formatting.

use crate::domain::DailySnapshot;
use std::collections::BTreeSet;

/// Incremental fingerprint over a sequence of snapshots.
#[derive(Debug, Default, Clone)]
pub struct SnapshotFingerprint {
    hasher: blake3::Hasher,
    snapshots: usize,
}

impl SnapshotFingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, snapshot: &DailySnapshot) {
        let h = &mut self.hasher;
        h.update(snapshot.date().to_string().as_bytes());
        h.update(&(snapshot.len() as u64).to_le_bytes());
        for row in snapshot.rows() {
            write_str(h, &row.coin_id);
            write_str(h, &row.symbol);
            h.update(&row.price.to_bits().to_le_bytes());
            h.update(&row.volume.to_bits().to_le_bytes());
            h.update(&row.market_cap.to_bits().to_le_bytes());
            h.update(&row.rank.to_le_bytes());
        }
        self.snapshots += 1;
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots
    }

    pub fn finish(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

/// Fingerprint of the metadata a verdict is derived from: the display name
/// and the category tag set. Tag order and duplicates do not matter.
pub fn metadata_fingerprint<S: AsRef<str>>(name: Option<&str>, tags: &[S]) -> [u8; 32] {
    let canonical: BTreeSet<&str> = tags.iter().map(|t| t.as_ref()).collect();
    let mut h = blake3::Hasher::new();
    match name {
        Some(name) => {
            h.update(&[1]);
            write_str(&mut h, name);
        }
        None => {
            h.update(&[0]);
        }
    }
    for tag in canonical {
        write_str(&mut h, tag);
    }
    *h.finalize().as_bytes()
}

fn write_str(h: &mut blake3::Hasher, s: &str) {
    h.update(&(s.len() as u64).to_le_bytes());
    h.update(s.as_bytes());
}
