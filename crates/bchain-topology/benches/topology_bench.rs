//! Benchmarks for bchain topology resolution
//!
//! Measures performance of:
//! - Full role resolution at different chain sizes
//! - Host-name identity lookup
//! - Chain size validation

use bchain_topology::{chain_size_for, fault_parameter, resolve, ChainTopology, LocalIdentity};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn addresses(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("replica-{}:7000", i)).collect()
}

/// Benchmark resolving the last replica (worst case for the linear scan)
fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for &f in &[1usize, 3, 10, 33, 100] {
        let n = chain_size_for(f);
        let addrs = addresses(n);
        let local = addrs[n - 1].clone();
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(n), &addrs, |b, addrs| {
            b.iter(|| resolve(black_box(addrs.clone()), black_box(&local)))
        });
    }
    group.finish();
}

/// Benchmark host-name identity resolution
fn bench_host_identity(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_identity");

    for &f in &[1usize, 10, 100] {
        let n = chain_size_for(f);
        let addrs = addresses(n);
        let identity = LocalIdentity::Host(format!("replica-{}", n / 2));
        group.bench_with_input(BenchmarkId::from_parameter(n), &addrs, |b, addrs| {
            b.iter(|| ChainTopology::from_identity(black_box(addrs.clone()), &identity))
        });
    }
    group.finish();
}

/// Benchmark chain size validation
fn bench_fault_parameter(c: &mut Criterion) {
    c.bench_function("fault_parameter", |b| {
        b.iter(|| {
            for n in 0..1024usize {
                let _ = fault_parameter(black_box(n));
            }
        })
    });
}

criterion_group!(benches, bench_resolve, bench_host_identity, bench_fault_parameter);
criterion_main!(benches);
