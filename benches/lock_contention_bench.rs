/*
Cost of the diagnostic mutex (holder bookkeeping on every acquire) against a bare
parking_lot mutex, with several threads hammering the same lock, and the cost of
posting to the coalescing trigger queue.
*/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use manifold_control::{concurrency::{DiagMutex, TriggerQueue}, control::task::Tick};
use parking_lot::Mutex;
use std::{hint::black_box, sync::Arc, thread, time::Instant};

//Number of concurrent threads contending on the same lock
const THREAD_COUNTS: &[usize] = &[2, 4, 8];

//Lock acquisitions each thread performs
const OPS_PER_THREAD: usize = 20_000;

fn bench_lock_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_contention");

    for &threads in THREAD_COUNTS {
        group.bench_with_input(BenchmarkId::new("DiagMutex", threads), &threads, |b, &threads| {
            let lock = Arc::new(DiagMutex::new("bench", 0u64));
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let l = Arc::clone(&lock);
                        thread::spawn(move || {
                            for _ in 0..OPS_PER_THREAD {
                                *l.lock("bench") += 1;
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    let _ = h.join();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("parking_lot", threads), &threads, |b, &threads| {
            let lock = Arc::new(Mutex::new(0u64));
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let l = Arc::clone(&lock);
                        thread::spawn(move || {
                            for _ in 0..OPS_PER_THREAD {
                                *l.lock() += 1;
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    let _ = h.join();
                }
            });
        });
    }

    group.finish();
}

fn bench_trigger(c: &mut Criterion) {
    let queue: TriggerQueue<Tick> = TriggerQueue::new();
    let mut seq = 0u64;
    c.bench_function("trigger_queue_post_coalescing", |b| {
        b.iter(|| {
            seq += 1;
            black_box(queue.trigger(Tick { seq, issued_at: Instant::now() }));
        })
    });
}

criterion_group!(benches, bench_lock_contention, bench_trigger);
criterion_main!(benches);
