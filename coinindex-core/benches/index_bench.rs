//! Criterion benchmarks for the index pipeline hot paths.
//!
//! Benchmarks:
//! 1. Snapshot assembly (rank rebuild from unranked rows)
//! 2. Snapshot merge of late entrants
//! 3. Constituent selection with a warm classifier cache
//! 4. Full index computation over an in-memory SQLite store

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use chrono::NaiveDate;
use coinindex_core::classification::{Classifier, EligibilityFilter, StaticTaxonomy};
use coinindex_core::domain::{DailySnapshot, IndexParams, MarketRow};
use coinindex_core::index::select_constituents;
use coinindex_core::store::{SnapshotStore, SqliteStore};
use coinindex_core::{IndexCalculator, SnapshotAggregator};

// ── Helpers ──────────────────────────────────────────────────────────

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn make_rows(n: usize, day: usize) -> Vec<MarketRow> {
    (0..n)
        .map(|i| {
            let price = 1.0 + i as f64 + (day as f64 * 0.3 + i as f64).sin();
            MarketRow {
                coin_id: format!("coin-{i:04}"),
                symbol: format!("C{i}"),
                price,
                volume: price * 1e5,
                market_cap: price * 1e6 * (n - i) as f64,
                rank: 0,
            }
        })
        .collect()
}

fn taxonomy(n: usize) -> StaticTaxonomy {
    (0..n).step_by(10).fold(StaticTaxonomy::new(), |t, i| {
        t.with_tags(&format!("coin-{i:04}"), &["Stablecoins"])
    })
}

// ── 1. Snapshot assembly ─────────────────────────────────────────────

fn bench_from_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_from_rows");
    for n in [100, 1_000, 5_000] {
        let rows = make_rows(n, 0);
        group.bench_with_input(BenchmarkId::from_parameter(n), &rows, |b, rows| {
            b.iter(|| DailySnapshot::from_rows(start(), black_box(rows.clone())).unwrap())
        });
    }
    group.finish();
}

// ── 2. Merge ─────────────────────────────────────────────────────────

fn bench_merge(c: &mut Criterion) {
    let base = DailySnapshot::from_rows(start(), make_rows(1_000, 0)).unwrap();
    let entrants: Vec<MarketRow> = (0..20)
        .map(|i| MarketRow {
            coin_id: format!("new-{i}"),
            symbol: format!("N{i}"),
            price: 2.0,
            volume: 1.0,
            market_cap: 5e8 + i as f64,
            rank: 0,
        })
        .collect();

    c.bench_function("merge_20_into_1000", |b| {
        b.iter(|| base.merge(black_box(entrants.clone())))
    });
}

// ── 3. Selection ─────────────────────────────────────────────────────

fn bench_selection(c: &mut Criterion) {
    let snapshot = DailySnapshot::from_rows(start(), make_rows(1_000, 0)).unwrap();
    let classifier = Classifier::new(taxonomy(1_000));
    let filter = EligibilityFilter::new(true, true);
    // warm the cache
    select_constituents(&snapshot, &classifier, filter, 1_000);

    c.bench_function("select_top_30_of_1000", |b| {
        b.iter(|| select_constituents(black_box(&snapshot), &classifier, filter, 30))
    });
}

// ── 4. Full computation ──────────────────────────────────────────────

fn bench_compute(c: &mut Criterion) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    for (day, date) in start().iter_days().take(30).enumerate() {
        store
            .write(&DailySnapshot::from_rows(date, make_rows(500, day)).unwrap())
            .unwrap();
    }
    let aggregator = SnapshotAggregator::new(store);
    let classifier = Classifier::new(taxonomy(500));
    let params = IndexParams::new(start(), start() + chrono::Duration::days(29));

    c.bench_function("compute_30_days_500_coins", |b| {
        b.iter(|| {
            IndexCalculator::new(&aggregator, &classifier)
                .compute(black_box(&params))
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_from_rows,
    bench_merge,
    bench_selection,
    bench_compute
);
criterion_main!(benches);
