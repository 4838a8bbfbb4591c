//! Benchmarks for the shapelog store
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use shapelog::index::{IndexCache, IndexMaintainer};
use shapelog::storage::calendar;
use shapelog::*;
use std::sync::Arc;
use tempfile::tempdir;

const DAY_START: i64 = 1_717_200_000; // 2024-06-01 00:00:00

fn create_test_record(data_time: i64) -> ShapeRecord {
    let mut record = ShapeRecord::new(ProductKind::Boundary, ProductSubKind::Detection, data_time)
        .ids(data_time % 1000, 1)
        .motion(270.0, 8.5);

    for (lead, label) in [(0, "b"), (1800, "b+30"), (3600, "b+60")] {
        let mut object = PolylineObject::new(label, lead);
        for i in 0..20 {
            object = object.point_with_motion(35.0 + i as f64 * 0.01, -97.0 + lead as f64 * 1e-4, 4.0, -2.5);
        }
        record = record.object(object);
    }
    record
}

/// A store with one record per minute across one day
fn create_filled_store(count: i64) -> (ShapeStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = ShapeStore::open(StoreConfig::new(dir.path()).suffix("bdry")).unwrap();
    for i in 0..count {
        store.append(&create_test_record(DAY_START + i * 60)).unwrap();
    }
    (store, dir)
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(1));

    group.bench_function("append_single", |b| {
        let dir = tempdir().unwrap();
        let store = ShapeStore::open(StoreConfig::new(dir.path()).suffix("bdry")).unwrap();
        let record = create_test_record(DAY_START + 43_200);

        b.iter(|| store.append(black_box(&record)).unwrap());
    });

    group.finish();
}

fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("index");

    for count in [100, 1000] {
        let (store, _dir) = create_filled_store(count);
        let day = calendar::utc_day(DAY_START);
        let index_path = store.config().index_path(day);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("full_rebuild_{}", count), |b| {
            b.iter_batched(
                || {
                    let _ = std::fs::remove_file(&index_path);
                    IndexMaintainer::new(Arc::new(IndexCache::new()))
                },
                |maintainer| {
                    maintainer
                        .ensure_index(store.data_dir(), "bdry", black_box(day))
                        .unwrap()
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("cache_hit_{}", count), |b| {
            store.ensure_index(day).unwrap();
            b.iter(|| store.ensure_index(black_box(day)).unwrap());
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let (store, _dir) = create_filled_store(1000);

    group.bench_function("closest", |b| {
        let request = store.request(ReadMode::Closest, DAY_START + 30_030).window(600);
        b.iter(|| store.query(black_box(&request)).unwrap());
    });

    group.bench_function("closest_with_lead", |b| {
        let request = store
            .request(ReadMode::Closest, DAY_START + 30_030)
            .window(600)
            .lead(1800, 300);
        b.iter(|| store.query(black_box(&request)).unwrap());
    });

    group.bench_function("all_hour", |b| {
        let request = store.request(ReadMode::All, DAY_START + 30_000).window(1800);
        b.iter(|| store.query(black_box(&request)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_append, bench_index, bench_query);
criterion_main!(benches);
