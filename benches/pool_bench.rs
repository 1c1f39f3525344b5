// benches/pool_bench.rs
//! Pool acquire/release throughput
//!
//! - **uncontended**: one task cycling a single slot
//! - **contended**: N tasks sharing fewer slots than tasks
//! - **signing**: HMAC over a typical request body

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flame_rpc::pool::{PoolConfig, RunnerPool, RunnerTarget};
use flame_rpc::security;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn static_pool(rt: &Runtime, runners: usize, concurrency: usize) -> Arc<RunnerPool> {
    let mut config = PoolConfig::default()
        .with_max(runners)
        .with_max_concurrency(concurrency);
    for i in 0..runners {
        config = config.with_runner(RunnerTarget::new(format!("http://127.0.0.1:{}", 9000 + i)));
    }
    Arc::new(
        rt.block_on(RunnerPool::new("bench", config, None))
            .expect("pool"),
    )
}

fn bench_uncontended(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let pool = static_pool(&rt, 1, 1);

    c.bench_function("acquire_release_uncontended", |b| {
        b.to_async(&rt).iter(|| {
            let pool = Arc::clone(&pool);
            async move {
                let runner = pool.acquire().await.expect("acquire");
                pool.release(black_box(&runner)).expect("release");
            }
        })
    });
}

fn bench_contended(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("acquire_release_contended");

    for tasks in [4usize, 16, 64] {
        let pool = static_pool(&rt, 2, 2);
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.to_async(&rt).iter(|| {
                let pool = Arc::clone(&pool);
                async move {
                    let mut handles = Vec::with_capacity(tasks);
                    for _ in 0..tasks {
                        let pool = Arc::clone(&pool);
                        handles.push(tokio::spawn(async move {
                            let runner = pool.acquire().await.expect("acquire");
                            tokio::task::yield_now().await;
                            pool.release(&runner).expect("release");
                        }));
                    }
                    for handle in handles {
                        handle.await.expect("task");
                    }
                }
            })
        });
    }
    group.finish();
}

fn bench_signing(c: &mut Criterion) {
    let body = br#"{"invocationId":"01HZX","serviceId":"math","methodId":"add","args":"[2,3]","iat":1700000000000,"exp":1700000060000}"#;
    let signature = security::sign(body, "bench-secret");

    c.bench_function("sign", |b| b.iter(|| security::sign(black_box(body), "bench-secret")));
    c.bench_function("verify", |b| {
        b.iter(|| security::verify(black_box(body), &signature, "bench-secret"))
    });
}

criterion_group!(benches, bench_uncontended, bench_contended, bench_signing);
criterion_main!(benches);
