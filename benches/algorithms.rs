//! Benchmarks for admission algorithms.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use admitgate::{
    AdmissionGateway, Algorithm, AlgorithmConfig, FailureMode, FixedWindow, GatewaySettings,
    GlobalKey, MemoryStorage, Quota, RouteConfig, SlidingWindowCounter, SlidingWindowLog,
    TokenBucket, GCRA,
};
use tokio::runtime::Runtime;

fn algorithms() -> Vec<AlgorithmConfig> {
    vec![
        GCRA::new(Quota::per_second(1000), 100).into(),
        TokenBucket::new(100.0, 1000.0).into(),
        FixedWindow::new(Quota::per_second(1000)).into(),
        SlidingWindowCounter::new(Quota::per_second(1000), 10).into(),
        SlidingWindowLog::new(Quota::per_second(1000)).into(),
    ]
}

fn bench_algorithms(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("algorithms");

    for algorithm in algorithms() {
        group.bench_function(algorithm.name(), |b| {
            let storage = MemoryStorage::new();
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("k:{}", i % 100);
                rt.block_on(async {
                    black_box(algorithm.check_and_record(&storage, &key, i).await)
                })
            })
        });
    }

    group.finish();
}

fn bench_algorithm_comparison(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("algorithm_comparison");

    for num_keys in [1, 10, 100, 1000].iter() {
        for algorithm in algorithms() {
            group.bench_with_input(
                BenchmarkId::new(algorithm.name(), num_keys),
                num_keys,
                |b, &num_keys| {
                    let storage = MemoryStorage::new();
                    let mut i = 0u64;
                    b.iter(|| {
                        i += 1;
                        let key = format!("k:{}", i % num_keys);
                        rt.block_on(async {
                            black_box(algorithm.check_and_record(&storage, &key, i).await)
                        })
                    })
                },
            );
        }
    }

    group.finish();
}

/// Per-request store round-trips against local batches.
fn bench_batched_admission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("gateway");

    for batch_percent in [None, Some(0.1), Some(0.5)] {
        let route = match batch_percent {
            Some(percent) => RouteConfig::new(TokenBucket::new(1000.0, 1000.0)).with_batch_percent(percent),
            None => RouteConfig::new(TokenBucket::new(1000.0, 1000.0)),
        };
        let label = match batch_percent {
            Some(percent) => format!("async_batch_percent_{}", percent),
            None => "script".to_string(),
        };

        group.bench_function(label, |b| {
            let gateway = AdmissionGateway::new(
                MemoryStorage::new(),
                Default::default(),
                GlobalKey::new(),
                GatewaySettings::new(FailureMode::FailOpen),
            );
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                rt.block_on(async { black_box(gateway.admit_key("bench", &route, i).await) })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_algorithms, bench_algorithm_comparison, bench_batched_admission);
criterion_main!(benches);
