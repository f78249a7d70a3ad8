//! Benchmarks for beacon-migrate.
//!
//! Run with: cargo bench -p beacon-migrate

#![allow(clippy::pedantic)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::Path;
use tempfile::TempDir;

use beacon_migrate::beacon::round_key;
use beacon_migrate::source::BEACONS;
use beacon_migrate::{BeaconRecord, MigrationConfig, Pipeline, Target};

fn record(round: u64) -> BeaconRecord {
    BeaconRecord {
        previous_signature: vec![0xAB; 96],
        round,
        signature: vec![0xCD; 96],
    }
}

fn write_legacy_store(path: &Path, rounds: u64) {
    let db = redb::Database::create(path).unwrap();
    let txn = db.begin_write().unwrap();
    {
        let mut table = txn.open_table(BEACONS).unwrap();
        for round in 1..=rounds {
            let value = record(round).encode_legacy().unwrap();
            table
                .insert(round_key(round).as_slice(), value.as_slice())
                .unwrap();
        }
    }
    txn.commit().unwrap();
}

/// Benchmark decoding of legacy values, and the raw fallback
fn bench_decode(c: &mut Criterion) {
    let key = round_key(1_000_000);
    let legacy = record(1_000_000).encode_legacy().unwrap();
    let raw = vec![0xCD; 96];

    let mut group = c.benchmark_group("decode");
    group.bench_function("legacy", |b| {
        b.iter(|| black_box(BeaconRecord::decode(&key, black_box(&legacy)).unwrap()))
    });
    group.bench_function("raw_fallback", |b| {
        b.iter(|| black_box(BeaconRecord::decode(&key, black_box(&raw)).unwrap()))
    });
    group.finish();
}

/// Benchmark a full embedded migration at several store sizes
fn bench_embedded_migration(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("embedded_migration");
    group.sample_size(10);

    for rounds in [1_000u64, 10_000, 50_000] {
        group.bench_with_input(BenchmarkId::new("rounds", rounds), &rounds, |b, &rounds| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    let path = dir.path().join("default.db");
                    write_legacy_store(&path, rounds);
                    let mut config = MigrationConfig::new(path, "default", Target::Embedded);
                    config.show_progress = false;
                    (dir, config)
                },
                |(dir, config)| {
                    let stats = runtime.block_on(Pipeline::new(config).run()).unwrap();
                    assert_eq!(stats.migrated_rows, rounds);
                    drop(dir);
                },
                criterion::BatchSize::PerIteration,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_embedded_migration);
criterion_main!(benches);
