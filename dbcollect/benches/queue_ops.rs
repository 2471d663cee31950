//! Benchmarks for queue operations using criterion.
//!
//! These benchmarks measure the performance of the report queue:
//! - Single push/pop round trip
//! - Fill and drain in batches
//! - One generator feeding several processors through a small queue
//! - Snapshot window parsing feeding the queue

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use dbcollect::planner::parse_windows;
use dbcollect::{DoneSignal, JobQueue, ReportKind};
use dbcollect_testkit::TestJob;
use tokio::runtime::Runtime;

const WAIT: Duration = Duration::from_secs(1);

/// Creates a tokio runtime for async benchmarks.
fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

/// Benchmark: push then pop a single job.
fn bench_push_pop_single(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("push_pop_single");
    group.sample_size(100);

    group.bench_function("capacity_10", |b| {
        let queue = Arc::new(JobQueue::new(10));
        let job = TestJob::simple("bench-job");

        b.to_async(&rt).iter(|| async {
            queue.push(job.clone(), WAIT).await.expect("push should succeed");
            queue.pop(WAIT).await.expect("pop should return the job");
        });
    });

    group.finish();
}

/// Benchmark: fill the queue to capacity, then drain it.
fn bench_fill_drain(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("fill_drain");
    group.sample_size(50);

    for size in [10usize, 50, 100, 200] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("in_memory", size), &size, |b, &size| {
            let queue = Arc::new(JobQueue::new(size));
            let jobs = TestJob::batch("job", size);

            b.to_async(&rt).iter(|| async {
                for job in &jobs {
                    queue.push(job.clone(), WAIT).await.expect("push should succeed");
                }
                while queue.pop(Duration::ZERO).await.is_some() {}
            });
        });
    }

    group.finish();
}

/// Benchmark: one producer and several consumers through a queue of 10.
fn bench_contended(c: &mut Criterion) {
    let rt = create_runtime();
    let total = 500usize;

    let mut group = c.benchmark_group("contended");
    group.sample_size(20);
    group.throughput(Throughput::Elements(total as u64));

    for consumers in [1usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("consumers", consumers),
            &consumers,
            |b, &consumers| {
                b.to_async(&rt).iter(|| async move {
                    let queue = Arc::new(JobQueue::new(10));
                    let done = DoneSignal::new();
                    let mut handles = Vec::with_capacity(consumers);
                    for _ in 0..consumers {
                        let queue = Arc::clone(&queue);
                        let done = done.clone();
                        handles.push(tokio::spawn(async move {
                            let mut taken = 0usize;
                            while !(done.is_set() && queue.is_empty()) {
                                if queue.pop(Duration::from_millis(5)).await.is_some() {
                                    taken += 1;
                                }
                            }
                            taken
                        }));
                    }
                    for job in TestJob::batch("job", total) {
                        queue.push(job, WAIT).await.expect("push should succeed");
                    }
                    done.set();
                    let mut taken = 0;
                    for handle in handles {
                        taken += handle.await.expect("consumer should not panic");
                    }
                    assert_eq!(taken, total);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: parse a week of hourly snapshot windows into jobs.
fn bench_parse_windows(c: &mut Criterion) {
    let rows: String = (0..168)
        .map(|i| {
            format!(
                "1234567890,1,{},{},2024010{}{:02}00,2024010{}{:02}59\n",
                100 + i,
                101 + i,
                1 + i / 24,
                i % 24,
                1 + i / 24,
                i % 24
            )
        })
        .collect();

    let mut group = c.benchmark_group("parse_windows");
    group.throughput(Throughput::Elements(168));
    group.bench_function("awr_week", |b| {
        b.iter(|| parse_windows("DB1", ReportKind::Awr, &rows).expect("rows parse"));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop_single,
    bench_fill_drain,
    bench_contended,
    bench_parse_windows
);
criterion_main!(benches);
