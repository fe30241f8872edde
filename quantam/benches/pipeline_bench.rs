//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quantam::{branch, quantam, RunManyOptions};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn single_run_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let flow = quantam::<u64>()
        .step(|n| async move { Ok(n + 1) })
        .step(|n: u64| async move { Ok(n * 2) })
        .retry(3, None)
        .unwrap()
        .parallel(vec![
            branch(|n: u64| async move { Ok(n + 1) }),
            branch(|n: u64| async move { Ok(n - 1) }),
        ]);

    c.bench_function("run_three_stages", |b| {
        b.to_async(&rt).iter(|| async { black_box(flow.run(black_box(20)).await) });
    });
}

fn batch_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let flow = quantam::<u64>().step(|n| async move {
        tokio::task::yield_now().await;
        Ok(n * n)
    });

    let mut group = c.benchmark_group("run_many");
    for concurrency in [1_usize, 16, 512] {
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| async {
                    let options = RunManyOptions::new().with_concurrency(concurrency);
                    black_box(flow.run_many(0..1_000, options).await)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, single_run_benchmark, batch_benchmark);
criterion_main!(benches);
