use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipeline_core::executor::{Executor, SyncExecutor, ThreadExecutor};
use pipeline_core::signal::Signal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NUM_EMITS: usize = 500_000;

fn single_subscriber_sync_executor(c: &mut Criterion) {
    c.bench_function("signal_single_subscriber_sync", |b| {
        let signal: Signal<usize> = Signal::new();
        let received = Arc::new(AtomicUsize::new(0));
        let executor: Arc<dyn Executor> = Arc::new(SyncExecutor);
        {
            let received = Arc::clone(&received);
            signal.connect(executor, move |value| {
                received.fetch_add(value, Ordering::Relaxed);
            });
        }
        b.iter(|| {
            for i in 0..NUM_EMITS {
                signal.emit(black_box(i));
            }
        })
    });
}

fn three_subscribers_sync_executor(c: &mut Criterion) {
    c.bench_function("signal_three_subscribers_sync", |b| {
        let signal: Signal<usize> = Signal::new();
        let received = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let received = Arc::clone(&received);
            let executor: Arc<dyn Executor> = Arc::new(SyncExecutor);
            signal.connect(executor, move |value| {
                received.fetch_add(value, Ordering::Relaxed);
            });
        }
        b.iter(|| {
            for i in 0..NUM_EMITS {
                signal.emit(black_box(i));
            }
        })
    });
}

fn single_subscriber_thread_executor(c: &mut Criterion) {
    c.bench_function("signal_single_subscriber_thread", |b| {
        let signal: Signal<usize> = Signal::new();
        let received = Arc::new(AtomicUsize::new(0));
        let executor: Arc<dyn Executor> = ThreadExecutor::new();
        {
            let received = Arc::clone(&received);
            signal.connect(executor, move |value| {
                received.fetch_add(value, Ordering::Relaxed);
            });
        }
        b.iter(|| {
            for i in 0..NUM_EMITS / 10 {
                signal.emit(black_box(i));
            }
        })
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = single_subscriber_sync_executor, three_subscribers_sync_executor, single_subscriber_thread_executor
);
criterion_main!(benches);
