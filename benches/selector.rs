//! State Selection Benchmarks
//!
//! Measures the cost of drawing the next state:
//! - Map width: 2 to 256 outgoing transitions
//! - Table lookup plus draw, as the runner does per iteration
//! - Error latch reads under concurrent writers
//!
//! Run with: cargo bench --bench selector

use churn::{select_next_state, ErrorLatch, TransitionTable, Transitions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const DRAWS: u64 = 10_000;

fn transitions(width: usize) -> Transitions {
    (0..width)
        .map(|i| (format!("state{}", i), (i % 7 + 1) as f64))
        .collect()
}

/// Single draw over maps of increasing width
fn bench_select_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("select/width");
    group.throughput(Throughput::Elements(DRAWS));

    for width in [2, 8, 32, 256] {
        let edges = transitions(width);
        group.bench_function(BenchmarkId::new("draws", width), |b| {
            let mut rng = StdRng::seed_from_u64(7);
            b.iter(|| {
                for _ in 0..DRAWS {
                    let next = select_next_state("source", &edges, rng.gen::<f64>()).unwrap();
                    black_box(next);
                }
            });
        });
    }

    group.finish();
}

/// Table lookup plus draw, walking the machine like a runner thread
fn bench_table_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("select/walk");
    group.throughput(Throughput::Elements(DRAWS));

    let mut table = TransitionTable::new();
    for i in 0..16 {
        table.insert(format!("state{}", i), transitions(16));
    }

    group.bench_function("16x16", |b| {
        let mut rng = StdRng::seed_from_u64(11);
        b.iter(|| {
            let mut current = "state0".to_string();
            for _ in 0..DRAWS {
                current = table
                    .next_state(&current, rng.gen::<f64>())
                    .unwrap()
                    .to_string();
            }
            black_box(current);
        });
    });

    group.finish();
}

/// Per-iteration latch check while other threads count down
fn bench_latch_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("latch/reads");
    group.throughput(Throughput::Elements(DRAWS));

    for writers in [0, 2] {
        group.bench_function(BenchmarkId::new("should_stop", writers), |b| {
            let latch = Arc::new(ErrorLatch::new(usize::MAX));
            let handles: Vec<_> = (0..writers)
                .map(|_| {
                    let latch = Arc::clone(&latch);
                    std::thread::spawn(move || {
                        for _ in 0..DRAWS {
                            latch.count_down();
                        }
                    })
                })
                .collect();

            b.iter(|| {
                for _ in 0..DRAWS {
                    black_box(latch.should_stop(usize::MAX));
                }
            });

            for h in handles {
                h.join().unwrap();
            }
        });
    }

    group.finish();
}

criterion_group!(benches, bench_select_width, bench_table_walk, bench_latch_reads);
criterion_main!(benches);
