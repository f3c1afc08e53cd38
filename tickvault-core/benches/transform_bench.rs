//! Criterion benchmarks for the transform hot path.
//!
//! Benchmarks:
//! 1. Full transform over N synthetic raw partitions
//! 2. Processed dataset write (Parquet, staging + swap)

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::PathBuf;

use tickvault_core::data::{ProcessedStore, RawStore, SyntheticSource, TransformEngine};

// ── Helpers ──────────────────────────────────────────────────────────

fn bench_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tickvault_bench_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Fill a raw store with `tickers` partitions of ~5 years of weekdays each.
fn seed_raw_store(root: &PathBuf, tickers: usize) {
    let store = RawStore::new(root);
    let start = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();
    for i in 0..tickers {
        let ticker = format!("T{i:03}");
        let records = SyntheticSource::generate(&ticker, start, end);
        store.write_partition(&ticker, &records).unwrap();
    }
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform");
    group.sample_size(10);

    for tickers in [1usize, 10, 50] {
        let root = bench_dir(&format!("raw_{tickers}"));
        seed_raw_store(&root, tickers);
        let engine = TransformEngine::new(&root);

        group.bench_with_input(BenchmarkId::new("run", tickers), &tickers, |b, _| {
            b.iter(|| black_box(engine.run().unwrap()))
        });

        let _ = std::fs::remove_dir_all(&root);
    }

    group.finish();
}

fn bench_write_dataset(c: &mut Criterion) {
    let mut group = c.benchmark_group("processed_store");
    group.sample_size(10);

    let raw_root = bench_dir("write_raw");
    seed_raw_store(&raw_root, 10);
    let dataset = TransformEngine::new(&raw_root).run().unwrap();

    let out = bench_dir("write_out");
    let store = ProcessedStore::new(out.join("processed"));

    group.bench_function("write_dataset_10_tickers", |b| {
        b.iter(|| black_box(store.write_dataset(&dataset).unwrap()))
    });

    group.finish();
    let _ = std::fs::remove_dir_all(&raw_root);
    let _ = std::fs::remove_dir_all(&out);
}

criterion_group!(benches, bench_transform, bench_write_dataset);
criterion_main!(benches);
