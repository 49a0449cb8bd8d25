//! Ordered index benchmarks for Arbor.
//!
//! Benchmarks for:
//! - Sequential and random inserts
//! - Point lookups
//! - Floor/ceiling queries
//! - Removals

use arbor_bench::utils::{generate_byte_keys, generate_sequential_keys};
use arbor_index::OrderedIndex;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Benchmark sequential inserts.
fn bench_insert_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/insert_sequential");

    for size in [1000, 10_000, 50_000].iter() {
        let keys = generate_sequential_keys(*size, "key_");

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut index = OrderedIndex::new();
                for (i, key) in keys.iter().enumerate() {
                    index.insert(key.clone(), i);
                }
                black_box(index.len())
            });
        });
    }

    group.finish();
}

/// Benchmark random inserts.
fn bench_insert_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/insert_random");

    for size in [1000, 10_000, 50_000].iter() {
        let keys = generate_byte_keys(*size, 16);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut index = OrderedIndex::new();
                for (i, key) in keys.iter().enumerate() {
                    index.insert(key.clone(), i);
                }
                black_box(index.len())
            });
        });
    }

    group.finish();
}

fn populated(keys: &[Vec<u8>]) -> OrderedIndex<usize> {
    let mut index = OrderedIndex::new();
    for (i, key) in keys.iter().enumerate() {
        index.insert(key.clone(), i);
    }
    index
}

/// Benchmark point lookups.
fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/find");

    for size in [1000, 10_000, 100_000].iter() {
        let keys = generate_byte_keys(*size, 16);
        let index = populated(&keys);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut found = 0usize;
                for key in &keys {
                    if index.find(key).is_some() {
                        found += 1;
                    }
                }
                black_box(found)
            });
        });
    }

    group.finish();
}

/// Benchmark floor and ceiling queries on absent keys.
fn bench_floor_ceiling(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/floor_ceiling");

    let size = 50_000;
    let keys = generate_byte_keys(size, 16);
    let index = populated(&keys);
    let probes: Vec<Vec<u8>> = keys
        .iter()
        .map(|k| {
            let mut probe = k.clone();
            probe.push(0);
            probe
        })
        .collect();

    group.throughput(Throughput::Elements(probes.len() as u64));
    group.bench_function("floor", |b| {
        b.iter(|| {
            for probe in &probes {
                black_box(index.find_floor(probe));
            }
        });
    });
    group.bench_function("ceiling", |b| {
        b.iter(|| {
            for probe in &probes {
                black_box(index.find_ceiling(probe));
            }
        });
    });

    group.finish();
}

/// Benchmark removing every entry.
fn bench_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/remove");

    for size in [1000, 10_000].iter() {
        let keys = generate_byte_keys(*size, 16);
        let index = populated(&keys);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter_batched(
                || index.clone(),
                |mut index| {
                    for key in &keys {
                        index.remove(key);
                    }
                    black_box(index.is_empty())
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_sequential,
    bench_insert_random,
    bench_find,
    bench_floor_ceiling,
    bench_remove
);
criterion_main!(benches);
