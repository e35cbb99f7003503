//! Registry operation benchmarks
//!
//! Run with: cargo bench -p nyx-dmareg

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nyx_dmareg::{AddressSpaceId, HandleId, Registry};
use rand::Rng;

const BUFFER_SIZE: u64 = 2 * 1024 * 1024;
const STRIDE: u64 = 4 * 1024 * 1024;

/// Benchmark sub-range queries against contexts of various sizes
fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    for count in [16u32, 1024, 65536].iter() {
        let registry = Registry::new();
        let ctx = registry.acquire(AddressSpaceId(1)).unwrap();
        for fd in 0..*count {
            ctx.add(HandleId(fd), u64::from(fd) * STRIDE, BUFFER_SIZE).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let mut rng = rand::thread_rng();
            b.iter(|| {
                let fd = rng.gen_range(0..count);
                let addr = u64::from(fd) * STRIDE + rng.gen_range(0..BUFFER_SIZE - 4096);
                ctx.query(black_box(addr), black_box(4096)).unwrap()
            });
        });

        registry.release(ctx);
    }

    group.finish();
}

/// Benchmark a registration followed by its removal
fn bench_add_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_remove");

    for count in [16u32, 1024, 65536].iter() {
        let registry = Registry::new();
        let ctx = registry.acquire(AddressSpaceId(1)).unwrap();
        for fd in 0..*count {
            ctx.add(HandleId(fd), u64::from(fd) * STRIDE, BUFFER_SIZE).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let mut rng = rand::thread_rng();
            b.iter(|| {
                // Fill the gap after a random buffer
                let fd = rng.gen_range(0..count);
                let base = u64::from(fd) * STRIDE + BUFFER_SIZE;
                ctx.add(HandleId(u32::MAX), base, BUFFER_SIZE).unwrap();
                ctx.remove_by_addr(black_box(base)).unwrap();
            });
        });

        registry.release(ctx);
    }

    group.finish();
}

/// Benchmark session open/close on an existing context
fn bench_acquire_release(c: &mut Criterion) {
    let registry = Registry::new();
    let held = registry.acquire(AddressSpaceId(1)).unwrap();

    c.bench_function("acquire_release", |b| {
        b.iter(|| {
            let ctx = registry.acquire(black_box(AddressSpaceId(1))).unwrap();
            registry.release(ctx)
        });
    });

    registry.release(held);
}

criterion_group!(benches, bench_query, bench_add_remove, bench_acquire_release);

criterion_main!(benches);
