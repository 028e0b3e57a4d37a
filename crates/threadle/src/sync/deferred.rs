//! Ticket lock with deferred callbacks
//!
//! [`DeferredLock::try_lock`] never blocks. If the lock is free the callback
//! is scheduled right away; otherwise it waits in a FIFO pending queue and is
//! scheduled when a release hands the lock over to it.

use crate::scheduler::task::catch_task;
use crate::scheduler::{Queue, TaskResult};
use crate::sync::TicketLock;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Hook invoked on lock transitions
pub(crate) type Hook = Arc<dyn Fn() + Send + Sync>;

type Callback = Box<dyn FnOnce() -> TaskResult + Send>;

/// Callback waiting for the lock
struct Pending {
    callback: Callback,
    target: Arc<Queue>,
}

#[derive(Default, Clone)]
pub(crate) struct LockHooks {
    pub(crate) on_acquire: Option<Hook>,
    pub(crate) on_release: Option<Hook>,
}

/// Fair lock whose waiters can be callbacks instead of blocked threads
pub struct DeferredLock {
    /// Underlying fair lock
    lock: TicketLock,

    /// Target for callbacks submitted without an explicit queue
    default_queue: Arc<Queue>,

    /// Callbacks waiting for the lock, oldest first.
    ///
    /// Ticket releases happen while this mutex is held, so an enqueue that
    /// raced a release always gets handed the lock.
    pending: Mutex<VecDeque<Pending>>,

    /// Transition hooks (set through [`HookedLock`](crate::sync::HookedLock))
    hooks: RwLock<LockHooks>,
}

impl DeferredLock {
    /// Create an unlocked lock scheduling callbacks on `default_queue` by default
    pub fn new(default_queue: Arc<Queue>) -> Self {
        Self {
            lock: TicketLock::new(),
            default_queue,
            pending: Mutex::new(VecDeque::new()),
            hooks: RwLock::new(LockHooks::default()),
        }
    }

    /// Run `callback` as a task on `target` (or the default queue) once this
    /// lock is owned. Returns `true` if the lock was free and the callback was
    /// scheduled immediately, `false` if it was queued behind the current owner.
    ///
    /// With `auto_release` the lock is released as soon as the callback
    /// returns, whether it succeeded or not. Otherwise the callback takes
    /// ownership and somebody must call [`release`](Self::release).
    pub fn try_lock<F>(
        self: &Arc<Self>,
        callback: F,
        target: Option<&Arc<Queue>>,
        auto_release: bool,
    ) -> bool
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let target = target.unwrap_or(&self.default_queue).clone();
        let callback: Callback = if auto_release {
            let lock = Arc::clone(self);
            Box::new(move || {
                let result = catch_task(callback);
                lock.release();
                result
            })
        } else {
            Box::new(callback)
        };

        let mut pending = self.pending.lock();
        if self.lock.try_acquire() {
            drop(pending);
            self.fire(|hooks| hooks.on_acquire.clone());
            target.submit_once(callback);
            true
        } else {
            pending.push_back(Pending { callback, target });
            false
        }
    }

    /// Block until the lock is owned
    pub fn acquire(&self) {
        self.acquire_observed(|_, _| {});
    }

    /// Like [`acquire`](Self::acquire), reporting `(iteration, outstanding)`
    /// while waiting
    pub fn acquire_observed<F>(&self, observer: F)
    where
        F: FnMut(u32, usize),
    {
        self.lock.acquire_observed(observer);
        self.fire(|hooks| hooks.on_acquire.clone());
    }

    /// Take the lock if free without queueing
    pub fn try_acquire(&self) -> bool {
        let acquired = self.lock.try_acquire();
        if acquired {
            self.fire(|hooks| hooks.on_acquire.clone());
        }
        acquired
    }

    /// Release the lock.
    ///
    /// If callbacks are pending, the oldest one is scheduled on its target
    /// queue and inherits the lock without it ever becoming free. Otherwise
    /// the lock is freed for the next blocked acquirer.
    pub fn release(&self) {
        let mut pending = self.pending.lock();
        match pending.pop_front() {
            Some(next) => {
                drop(pending);
                tracing::trace!(queue = next.target.name(), "lock handed to pending callback");
                next.target.submit_once(next.callback);
            }
            None => {
                self.lock.release();
                drop(pending);
                self.fire(|hooks| hooks.on_release.clone());
            }
        }
    }

    /// Callbacks waiting for the lock
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Owner plus blocked acquirers holding a ticket
    pub(crate) fn queued(&self) -> usize {
        self.lock.queued()
    }

    /// Whether the lock is currently owned
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Queue used when `try_lock` gets no explicit target
    pub fn default_queue(&self) -> &Arc<Queue> {
        &self.default_queue
    }

    pub(crate) fn set_hooks(&self, update: impl FnOnce(&mut LockHooks)) {
        update(&mut self.hooks.write());
    }

    fn fire(&self, select: impl FnOnce(&LockHooks) -> Option<Hook>) {
        let hook = select(&self.hooks.read());
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for DeferredLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredLock")
            .field("locked", &self.is_locked())
            .field("pending", &self.pending_count())
            .field("default_queue", &self.default_queue.name())
            .finish()
    }
}
