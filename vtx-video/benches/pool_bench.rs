//! Benchmarks for vtx-video
//!
//! Measures the hot-path cost of buffer checkout/return and timestamp
//! matching under B-frame style out-of-order lookups.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vtx_video::{BufferPool, NodePool, TimestampQueue};

fn bench_buffer_pool_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool_cycle");

    for capacity in [8, 64, 256].iter() {
        let pool = BufferPool::new("bench", *capacity, 4096).unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            capacity,
            |b, _| {
                b.iter(|| {
                    let buf = pool.get().unwrap();
                    black_box(&buf);
                    pool.put_back(buf);
                });
            },
        );
    }

    group.finish();
}

fn bench_timestamp_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("timestamp_match");

    // Reordering depth controls how deep the nearest-match scan runs.
    for depth in [1u64, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, &depth| {
            let mut pool = NodePool::new(64);
            let mut queue = TimestampQueue::new("bench");
            let mut offset = 0u64;

            b.iter(|| {
                for _ in 0..depth {
                    queue.push(&mut pool, offset, offset as i64).unwrap();
                    offset += 1500;
                }
                // Request newest-first, like display order vs bitstream
                // order under reordering.
                for i in 0..depth {
                    let want = offset - (i + 1) * 1500;
                    black_box(queue.pop(&mut pool, want + 30, 100).unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_buffer_pool_cycle, bench_timestamp_match);
criterion_main!(benches);
