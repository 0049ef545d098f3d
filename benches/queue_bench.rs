//! Benchmarks for the job queue's enqueue/claim path.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use frame_dispatch::core::{Job, JobQueue};
use uuid::Uuid;

fn now_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis()
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    for size in [100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = JobQueue::new();
                for i in 0..size {
                    let job = Job::new(
                        "nlp",
                        serde_json::json!({ "doc": i }),
                        (i % 7) as i32,
                        3,
                        now_ms(),
                    );
                    queue.enqueue(black_box(job)).unwrap();
                }
                queue
            });
        });
    }
    group.finish();
}

fn bench_claim_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_drain");
    for size in [100_u64, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let queue = JobQueue::new();
                    for i in 0..size {
                        let job = Job::new(
                            "nlp",
                            serde_json::json!({ "doc": i }),
                            (i % 7) as i32,
                            3,
                            now_ms(),
                        );
                        queue.enqueue(job).unwrap();
                    }
                    queue
                },
                |queue| {
                    let worker = Uuid::new_v4();
                    while let Some(job) = queue.claim("nlp", worker) {
                        queue.complete(black_box(job.id), worker, serde_json::Value::Null);
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_enqueue_claim_interleaved(c: &mut Criterion) {
    c.bench_function("enqueue_claim_interleaved", |b| {
        let queue = JobQueue::new();
        let worker = Uuid::new_v4();
        b.iter(|| {
            let id = queue
                .enqueue(Job::new("nlp", serde_json::Value::Null, 10, 0, now_ms()))
                .unwrap();
            let job = queue.claim("nlp", worker).unwrap();
            assert_eq!(job.id, id);
            queue.complete(id, worker, serde_json::Value::Null);
        });
    });
}

criterion_group!(
    benches,
    bench_enqueue,
    bench_claim_drain,
    bench_enqueue_claim_interleaved
);
criterion_main!(benches);
