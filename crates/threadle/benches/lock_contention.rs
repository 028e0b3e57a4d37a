use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;
use threadle::{Queue, ReadWriteLock, TicketLock};

fn bench_ticket_uncontended(c: &mut Criterion) {
    let lock = TicketLock::new();
    c.bench_function("ticket_uncontended", |b| {
        b.iter(|| {
            lock.acquire();
            black_box(lock.is_locked());
            lock.release();
        });
    });
}

fn bench_ticket_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("ticket_contended");
    for threads in [2usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let lock = Arc::new(TicketLock::new());
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let lock = lock.clone();
                        thread::spawn(move || {
                            for _ in 0..1_000 {
                                let _guard = lock.lock();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_rwlock_read(c: &mut Criterion) {
    let lock = ReadWriteLock::new();
    c.bench_function("rwlock_read", |b| {
        b.iter(|| {
            lock.acquire_read();
            black_box(lock.reader_count());
            lock.release_read().unwrap();
        });
    });
}

fn bench_queue_pull(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_pull");
    for tasks in [1usize, 64] {
        group.bench_with_input(BenchmarkId::new("immediate_recurring", tasks), &tasks, |b, &tasks| {
            let queue = Queue::immediate("bench", 0);
            for _ in 0..tasks {
                queue.submit_recurring(|| Ok(()));
            }
            b.iter(|| {
                if let Some(task) = queue.pull() {
                    let _ = queue.execute(&task);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_ticket_uncontended,
    bench_ticket_contended,
    bench_rwlock_read,
    bench_queue_pull
);
criterion_main!(benches);
