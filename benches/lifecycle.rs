//! Benchmarks for `MemoryCore` open/close lifecycle.
//!
//! Run with: `cargo bench`
//!
//! Performance targets:
//! - `open()` < 100ms for a new database
//! - `open()` < 100ms for an existing database
//! - `close()` < 50ms

use criterion::{criterion_group, criterion_main, Criterion};
use agentmem::{registry, Config, MemoryCore};
use tempfile::tempdir;

fn open(path: &std::path::Path) -> MemoryCore {
    let config = Config::default();
    let handles = registry::build_handles(&config).unwrap();
    MemoryCore::open(path, config, handles).unwrap()
}

/// Benchmark opening a new database.
fn bench_open_new(c: &mut Criterion) {
    c.bench_function("open_new_database", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;

            for _ in 0..iters {
                let dir = tempdir().unwrap();
                let path = dir.path().join("test.db");

                let start = std::time::Instant::now();
                let core = open(&path);
                total += start.elapsed();

                core.close().unwrap();
            }

            total
        });
    });
}

/// Benchmark opening an existing database.
fn bench_open_existing(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");

    let core = open(&path);
    core.close().unwrap();

    c.bench_function("open_existing_database", |b| {
        b.iter(|| {
            let core = open(&path);
            core.close().unwrap();
        });
    });
}

/// Benchmark closing a database.
fn bench_close(c: &mut Criterion) {
    c.bench_function("close_database", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;

            for _ in 0..iters {
                let dir = tempdir().unwrap();
                let path = dir.path().join("test.db");

                let core = open(&path);

                let start = std::time::Instant::now();
                core.close().unwrap();
                total += start.elapsed();
            }

            total
        });
    });
}

criterion_group!(benches, bench_open_new, bench_open_existing, bench_close);
criterion_main!(benches);
