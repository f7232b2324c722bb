//! Benchmarks `Pool::maintain_worker_count` convergence: spawning a
//! generation of workers, then reconciling down to a smaller target size.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use procwarden::{Pool, Worker, WorkerFactory, WorkerHandler, WorkerOptions};
use std::sync::Arc;

struct InstantWorker;

impl Worker for InstantWorker {
    fn start(&mut self) -> i32 {
        0
    }
}

struct InstantFactory;

impl WorkerFactory for InstantFactory {
    fn build(&self, _options: &WorkerOptions) -> Box<dyn Worker> {
        Box::new(InstantWorker)
    }
}

fn build_pool(size: usize) -> Pool {
    let handler = Arc::new(WorkerHandler::new("bench-worker", Arc::new(InstantFactory)));
    Pool::new("bench-pool", handler, size, WorkerOptions::new())
}

fn reconcile_benchmark(c: &mut Criterion) {
    c.bench_function("maintain_worker_count shrink 16 -> 4", |b| {
        b.iter_batched(
            || {
                let pool = build_pool(4);
                pool.spawn_workers(16).unwrap();
                pool
            },
            |pool| {
                pool.maintain_worker_count("stop_forcefully").unwrap();
                pool.wait().unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, reconcile_benchmark);
criterion_main!(benches);
