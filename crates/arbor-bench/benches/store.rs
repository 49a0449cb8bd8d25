//! Store benchmarks for Arbor.
//!
//! Benchmarks for:
//! - Value writes along fresh and existing paths
//! - Path reads and address lookups
//! - Subtree deletes
//! - Record writes with an auto-link index attached
//! - Concurrent readers and writers

use std::sync::Arc;
use std::thread;

use arbor_bench::utils::{generate_paths, generate_user_records};
use arbor_common::types::StoreKey;
use arbor_link::{LinkConfig, LinkEngine};
use arbor_store::{IndexDefinition, Store};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn populated(paths: &[StoreKey]) -> Store {
    let store = Store::default();
    for path in paths {
        store.set_value(path, "v").unwrap();
    }
    store
}

/// Benchmark value writes.
fn bench_set_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/set_value");

    for size in [1000, 10_000].iter() {
        let paths = generate_paths(*size, 4, 16);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(populated(&paths).node_count()));
        });
    }

    group.finish();
}

/// Benchmark path reads and address lookups.
fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/read");

    let paths = generate_paths(10_000, 4, 16);
    let store = populated(&paths);
    let addresses: Vec<_> = paths.iter().filter_map(|p| store.address_of(p)).collect();

    group.throughput(Throughput::Elements(paths.len() as u64));
    group.bench_function("get", |b| {
        b.iter(|| {
            for path in &paths {
                black_box(store.get(path));
            }
        });
    });
    group.bench_function("view_by_address", |b| {
        b.iter(|| {
            for address in &addresses {
                black_box(store.view_by_address(*address));
            }
        });
    });
    group.bench_function("children", |b| {
        b.iter(|| {
            for path in paths.iter().take(1000) {
                if let Some(parent) = path.parent() {
                    black_box(store.children(&parent));
                }
            }
        });
    });

    group.finish();
}

/// Benchmark deleting first-level subtrees.
fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/delete");
    let paths = generate_paths(10_000, 4, 16);

    group.bench_function("subtrees", |b| {
        b.iter_batched(
            || populated(&paths),
            |store| {
                for top in store.children(&StoreKey::root()) {
                    store.delete(&StoreKey::root().child(top));
                }
                black_box(store.node_count())
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

/// Benchmark record writes with one index on the record parent.
fn bench_auto_link(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/auto_link");

    for size in [1000, 5000].iter() {
        let records = generate_user_records(*size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let store = Store::default();
                let engine = LinkEngine::attach(&store, LinkConfig::default());
                let parent = StoreKey::parse("/records").unwrap();
                let definition = IndexDefinition::parse("/by-user", &["user"]).unwrap();
                engine.define_index(&store, &parent, definition).unwrap();
                for record in &records {
                    store.set_value(record, "").unwrap();
                }
                black_box(engine.stats().entries_added)
            });
        });
    }

    group.finish();
}

/// Benchmark mixed concurrent readers and writers.
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/concurrent");
    let paths = Arc::new(generate_paths(4000, 3, 8));

    for threads in [2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, &threads| {
            b.iter(|| {
                let store = Arc::new(Store::default());
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let store = Arc::clone(&store);
                        let paths = Arc::clone(&paths);
                        thread::spawn(move || {
                            for (i, path) in paths.iter().enumerate().skip(t).step_by(threads) {
                                if i % 2 == 0 {
                                    store.set_value(path, "v").unwrap();
                                } else {
                                    black_box(store.get(path));
                                }
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
                black_box(store.node_count())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_set_value,
    bench_reads,
    bench_delete,
    bench_auto_link,
    bench_concurrent
);
criterion_main!(benches);
