//! Integration tests for the lock family

mod common;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use threadle::{ReadWriteLock, TicketLock};

#[test]
fn test_ticket_lock_grants_in_arrival_order() {
    let lock = Arc::new(TicketLock::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    lock.acquire();

    let mut handles = Vec::new();
    for i in 0..8 {
        let lock_clone = lock.clone();
        let order = order.clone();
        handles.push(thread::spawn(move || {
            lock_clone.acquire();
            order.lock().push(i);
            lock_clone.release();
        }));
        // Holder plus every waiter so far, so the next thread arrives strictly later
        assert!(common::wait_until(|| lock.queued() == i + 2));
    }

    lock.release();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    assert!(!lock.is_locked());
}

#[test]
fn test_ticket_lock_mutual_exclusion() {
    let lock = Arc::new(TicketLock::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let lock = lock.clone();
            let inside = inside.clone();
            let total = total.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let _guard = lock.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    total.fetch_add(1, Ordering::Relaxed);
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(total.load(Ordering::Relaxed), 1200);
}

#[test]
fn test_many_concurrent_readers() {
    let lock = Arc::new(ReadWriteLock::new());
    let barrier = Arc::new(Barrier::new(17));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let lock = lock.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                lock.acquire_read();
                barrier.wait();
                barrier.wait();
                lock.release_read().unwrap();
            })
        })
        .collect();

    barrier.wait();
    assert_eq!(lock.reader_count(), 16);
    assert!(!lock.try_acquire_write());
    barrier.wait();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(lock.reader_count(), 0);
    assert!(lock.try_acquire_write());
    lock.release_write().unwrap();
}

#[test]
fn test_reader_writer_exclusivity() {
    let lock = Arc::new(ReadWriteLock::new());
    let readers = Arc::new(AtomicUsize::new(0));
    let writing = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let lock = lock.clone();
        let readers = readers.clone();
        let writing = writing.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                lock.acquire_read();
                assert!(!writing.load(Ordering::SeqCst));
                readers.fetch_add(1, Ordering::SeqCst);
                thread::yield_now();
                readers.fetch_sub(1, Ordering::SeqCst);
                lock.release_read().unwrap();
            }
        }));
    }
    for _ in 0..2 {
        let lock = lock.clone();
        let readers = readers.clone();
        let writing = writing.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..20 {
                lock.acquire_write();
                assert_eq!(readers.load(Ordering::SeqCst), 0);
                assert!(!writing.swap(true, Ordering::SeqCst));
                thread::sleep(Duration::from_micros(50));
                writing.store(false, Ordering::SeqCst);
                lock.release_write().unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!lock.is_write_locked());
    assert_eq!(lock.reader_count(), 0);
}

#[test]
fn test_deferred_lock_drains_one_callback_per_release() {
    let runtime = common::runtime(2);
    let lock = runtime.deferred_lock();
    let order = Arc::new(Mutex::new(Vec::new()));

    lock.acquire();
    for i in 0..5 {
        let order = order.clone();
        let scheduled = lock.try_lock(
            move || {
                order.lock().push(i);
                Ok(())
            },
            None,
            false,
        );
        assert!(!scheduled);
    }
    assert_eq!(lock.pending_count(), 5);

    for released in 1..=5 {
        lock.release();
        assert!(common::wait_until(|| order.lock().len() == released));
        // Give a wrongly scheduled extra callback the chance to show up
        thread::sleep(Duration::from_millis(5));
        assert_eq!(order.lock().len(), released);
        assert!(lock.is_locked());
        assert_eq!(lock.pending_count(), 5 - released);
    }

    lock.release();
    assert!(!lock.is_locked());
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    runtime.shutdown().unwrap();
}

#[test]
fn test_hooked_lock_serializes_callbacks_from_many_threads() {
    let runtime = Arc::new(common::runtime(3));
    let lock = Arc::new(runtime.hooked_lock());
    let acquired = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    {
        let acquired = acquired.clone();
        lock.set_on_acquire(move || {
            acquired.fetch_add(1, Ordering::SeqCst);
        });
        let released = released.clone();
        lock.set_on_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        });
    }

    let inside = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let lock = lock.clone();
            let inside = inside.clone();
            let done = done.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let inside = inside.clone();
                    let done = done.clone();
                    lock.try_lock(
                        move || {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            inside.fetch_sub(1, Ordering::SeqCst);
                            done.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        },
                        None,
                        true,
                    );
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    assert!(common::wait_until(|| done.load(Ordering::SeqCst) == 200));
    assert!(common::wait_until(|| !lock.is_locked()));
    assert_eq!(runtime.default_queue().stats().failed, 0);
    assert!(acquired.load(Ordering::SeqCst) >= 1);
    assert!(common::wait_until(
        || acquired.load(Ordering::SeqCst) == released.load(Ordering::SeqCst)
    ));
    runtime.shutdown().unwrap();
}
