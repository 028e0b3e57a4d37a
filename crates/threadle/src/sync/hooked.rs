//! Deferred lock with acquire/release hooks

use crate::scheduler::{LiveWorkers, Queue};
use crate::sync::DeferredLock;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// [`DeferredLock`] that notifies hooks on ownership transitions.
///
/// The acquire hook runs once each time the lock goes from free to owned, and
/// the release hook once each time it is actually freed. Handing the lock to
/// a pending callback is neither.
///
/// All of the deferred lock's operations are available through `Deref`.
pub struct HookedLock {
    inner: Arc<DeferredLock>,
    live: LiveWorkers,
}

impl HookedLock {
    /// Create a lock scheduling callbacks on `default_queue`. `live` is the
    /// worker count consulted by the debug contention check.
    pub fn new(default_queue: Arc<Queue>, live: LiveWorkers) -> Self {
        Self {
            inner: Arc::new(DeferredLock::new(default_queue)),
            live,
        }
    }

    /// Set the hook run when the lock becomes owned
    pub fn set_on_acquire<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.set_hooks(|hooks| hooks.on_acquire = Some(Arc::new(hook)));
    }

    /// Set the hook run when the lock is freed
    pub fn set_on_release<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.set_hooks(|hooks| hooks.on_release = Some(Arc::new(hook)));
    }

    /// Remove both hooks
    pub fn clear_hooks(&self) {
        self.inner.set_hooks(|hooks| {
            hooks.on_acquire = None;
            hooks.on_release = None;
        });
    }

    /// Block until the lock is owned.
    ///
    /// Debug builds warn once per wait when more tickets are outstanding than
    /// there are live workers, which usually means every worker is stuck
    /// waiting on this lock.
    pub fn acquire(&self) {
        if !cfg!(debug_assertions) {
            self.inner.acquire();
            return;
        }

        let mut warned = false;
        self.inner.acquire_observed(|iteration, outstanding| {
            let live_workers = self.live.get();
            if !warned && outstanding > live_workers.max(1) {
                warned = true;
                tracing::warn!(
                    outstanding,
                    live_workers,
                    iteration,
                    "suspected deadlock: lock waiters exceed live workers"
                );
            }
        });
    }

    /// The wrapped deferred lock
    pub fn as_deferred(&self) -> &Arc<DeferredLock> {
        &self.inner
    }
}

impl Deref for HookedLock {
    type Target = Arc<DeferredLock>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl fmt::Debug for HookedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookedLock")
            .field("inner", &self.inner)
            .field("live_workers", &self.live.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counters {
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    fn hooked(queue: &Arc<Queue>) -> (HookedLock, Counters) {
        let lock = HookedLock::new(queue.clone(), LiveWorkers::default());
        let counters = Counters {
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        };
        let acquired = counters.acquired.clone();
        lock.set_on_acquire(move || {
            acquired.fetch_add(1, Ordering::SeqCst);
        });
        let released = counters.released.clone();
        lock.set_on_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        });
        (lock, counters)
    }

    fn pump(queue: &Queue) {
        while let Some(task) = queue.pull() {
            let _ = queue.execute(&task);
        }
    }

    #[test]
    fn test_hooks_fire_on_blocking_and_try_acquire() {
        let queue = Queue::immediate("hooks", 0);
        let (lock, counters) = hooked(&queue);

        lock.acquire();
        assert_eq!(counters.acquired.load(Ordering::SeqCst), 1);
        assert!(!lock.try_acquire());
        lock.release();
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);

        assert!(lock.try_acquire());
        lock.release();
        assert_eq!(counters.acquired.load(Ordering::SeqCst), 2);
        assert_eq!(counters.released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handoff_is_not_a_transition() {
        let queue = Queue::immediate("handoff", 0);
        let (lock, counters) = hooked(&queue);

        for _ in 0..3 {
            lock.try_lock(|| Ok(()), None, true);
        }
        pump(&queue);

        assert!(!lock.is_locked());
        assert_eq!(counters.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[cfg(debug_assertions)]
    mod contention {
        use super::*;
        use std::thread;
        use std::time::{Duration, Instant};
        use tracing_subscriber::layer::{Context, SubscriberExt};
        use tracing_subscriber::Layer;

        /// Counts warnings emitted on the thread it is installed on
        struct WarnCounter(Arc<AtomicUsize>);

        impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
            fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
                if *event.metadata().level() == tracing::Level::WARN {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if condition() {
                    return true;
                }
                thread::sleep(Duration::from_millis(1));
            }
            condition()
        }

        fn spawn_waiter(
            lock: &Arc<HookedLock>,
            warnings: &Arc<AtomicUsize>,
        ) -> thread::JoinHandle<()> {
            let lock = lock.clone();
            let subscriber =
                tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
            thread::spawn(move || {
                let _default = tracing::subscriber::set_default(subscriber);
                lock.acquire();
                lock.release();
            })
        }

        #[test]
        fn test_waiters_beyond_live_workers_warn_once_each() {
            let queue = Queue::immediate("contended", 0);
            let lock = Arc::new(HookedLock::new(queue, LiveWorkers::default()));
            let warnings = Arc::new(AtomicUsize::new(0));

            lock.acquire();
            let waiters: Vec<_> = (0..2).map(|_| spawn_waiter(&lock, &warnings)).collect();
            assert!(wait_until(|| warnings.load(Ordering::SeqCst) == 2));

            // Both keep spinning; neither repeats its warning
            thread::sleep(Duration::from_millis(20));
            assert_eq!(warnings.load(Ordering::SeqCst), 2);

            lock.release();
            for waiter in waiters {
                waiter.join().unwrap();
            }
            assert!(!lock.is_locked());
        }

        #[test]
        fn test_waiters_within_live_workers_stay_quiet() {
            let queue = Queue::immediate("quiet", 0);
            let live = LiveWorkers::default();
            for _ in 0..4 {
                live.increment();
            }
            let lock = Arc::new(HookedLock::new(queue, live));
            let warnings = Arc::new(AtomicUsize::new(0));

            lock.acquire();
            let waiter = spawn_waiter(&lock, &warnings);
            assert!(wait_until(|| lock.queued() == 2));
            thread::sleep(Duration::from_millis(20));
            assert_eq!(warnings.load(Ordering::SeqCst), 0);

            lock.release();
            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_clear_hooks() {
        let queue = Queue::immediate("clear", 0);
        let (lock, counters) = hooked(&queue);
        lock.clear_hooks();

        lock.acquire();
        lock.release();
        assert_eq!(counters.acquired.load(Ordering::SeqCst), 0);
        assert_eq!(counters.released.load(Ordering::SeqCst), 0);
    }
}
