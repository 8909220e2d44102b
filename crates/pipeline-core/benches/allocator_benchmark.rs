use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipeline_core::allocator::BoundedAllocator;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const NUM_ALLOCATIONS: usize = 200_000;
const BLOCK_SIZE: usize = 4096;

fn uncontended_alloc_free(c: &mut Criterion) {
    c.bench_function("alloc_free_uncontended", |b| {
        let allocator = BoundedAllocator::new(BoundedAllocator::DEFAULT_NUM_BLOCKS);
        b.iter(|| {
            for _ in 0..NUM_ALLOCATIONS {
                let block = allocator.alloc(BLOCK_SIZE).expect("block");
                black_box(block.as_slice());
            }
        })
    });
}

fn contended_alloc_free(c: &mut Criterion) {
    c.bench_function("alloc_free_two_producers", |b| {
        b.iter(|| {
            let allocator = Arc::new(BoundedAllocator::new(BoundedAllocator::LOW_LATENCY_NUM_BLOCKS));
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let allocator = Arc::clone(&allocator);
                    thread::spawn(move || {
                        for _ in 0..NUM_ALLOCATIONS / 2 {
                            let block = allocator.alloc(BLOCK_SIZE).expect("block");
                            black_box(block.as_slice());
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }
        })
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = uncontended_alloc_free, contended_alloc_free
);
criterion_main!(benches);
