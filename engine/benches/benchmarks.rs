//! Performance benchmarks for tether-engine

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tether_engine::{merge, LocalStore, MemoryStore, MergeStrategy, Record, SyncMonitor};

fn records(count: usize, offset_secs: i64, prefix: &str) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new(format!("rec_{}", i))
                .modified(Utc.timestamp_opt(offset_secs + i as i64, 0).unwrap())
                .with_field("title", json!(format!("{} {}", prefix, i)))
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [10usize, 100, 1000] {
        // Half the ids overlap between sides
        let local = records(size, 1_000, "local");
        let remote: Vec<Record> = records(size, 500, "remote")
            .into_iter()
            .enumerate()
            .map(|(i, mut r)| {
                r.id = format!("rec_{}", i + size / 2);
                r
            })
            .collect();

        for strategy in [MergeStrategy::ServerWins, MergeStrategy::NewestWins] {
            group.bench_with_input(
                BenchmarkId::new(strategy.as_str(), size),
                &(&local, &remote),
                |b, (local, remote)| b.iter(|| {
                    merge(
                        black_box(local.as_slice()),
                        black_box(remote.as_slice()),
                        strategy,
                    )
                }),
            );
        }
    }

    group.finish();
}

fn bench_local_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_store");

    for size in [10usize, 100, 1000] {
        let data = records(size, 0, "doc");

        group.bench_with_input(BenchmarkId::new("write", size), &data, |b, data| {
            let store = LocalStore::<Record>::new(MemoryStore::new_shared(), "bench").unwrap();
            b.iter(|| store.write(black_box("documents"), black_box(data), 1000))
        });

        group.bench_with_input(BenchmarkId::new("read", size), &data, |b, data| {
            let store = LocalStore::<Record>::new(MemoryStore::new_shared(), "bench").unwrap();
            store.write("documents", data, 1000).unwrap();
            b.iter(|| store.read(black_box("documents")))
        });
    }

    group.finish();
}

fn bench_monitor(c: &mut Criterion) {
    let mut group = c.benchmark_group("monitor");

    group.bench_function("record_attempt", |b| {
        let mut monitor = SyncMonitor::new();
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            let attempt = format!("attempt_{}", id);
            monitor.record_start(attempt.as_str(), "documents", "auto", id);
            monitor.record_failure(&attempt, "timeout", id + 5)
        })
    });

    group.bench_function("status", |b| {
        let mut monitor = SyncMonitor::new();
        for i in 0..100u64 {
            let attempt = format!("attempt_{}", i);
            monitor.record_start(attempt.as_str(), "documents", "auto", i);
            monitor.record_success(&attempt, i + 1);
        }

        b.iter(|| monitor.status(black_box(200)))
    });

    group.finish();
}

criterion_group!(benches, bench_merge, bench_local_store, bench_monitor);
criterion_main!(benches);
