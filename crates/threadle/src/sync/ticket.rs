//! Fair FIFO spinlock

use crate::backoff::lock_backoff;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fair spinlock granting access strictly in arrival order.
///
/// Arriving threads draw a ticket from `tail`; the holder of the ticket equal
/// to `head` owns the lock. Releasing advances `head`, which hands the lock
/// to the next ticket holder if one is queued.
///
/// The lock is not reentrant and not tied to the acquiring thread: any thread
/// may call [`release`](Self::release), which is what lets
/// [`DeferredLock`](crate::sync::DeferredLock) release from a worker thread.
pub struct TicketLock {
    /// Next ticket to hand out
    tail: CachePadded<AtomicUsize>,

    /// Ticket currently being served
    head: CachePadded<AtomicUsize>,
}

impl TicketLock {
    /// Create an unlocked ticket lock
    pub const fn new() -> Self {
        Self {
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Take the lock if it is free and nobody is queued. Never blocks.
    pub fn try_acquire(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        self.tail
            .compare_exchange(
                head,
                head.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Queue for the lock and spin until it is this caller's turn
    pub fn acquire(&self) {
        self.acquire_observed(|_, _| {});
    }

    /// Like [`acquire`](Self::acquire), calling `observer(iteration, outstanding)`
    /// on every unsuccessful check while waiting.
    ///
    /// `outstanding` is the number of tickets drawn but not yet served,
    /// including the current holder and this caller.
    pub fn acquire_observed<F>(&self, mut observer: F)
    where
        F: FnMut(u32, usize),
    {
        let ticket = self.tail.fetch_add(1, Ordering::AcqRel);
        let mut iteration: u32 = 0;
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head == ticket {
                return;
            }
            let outstanding = self.tail.load(Ordering::Relaxed).wrapping_sub(head);
            observer(iteration, outstanding);
            lock_backoff(iteration).wait();
            iteration = iteration.saturating_add(1);
        }
    }

    /// Release the lock, handing it to the next queued ticket if any.
    ///
    /// Must only be called while the lock is held.
    pub fn release(&self) {
        debug_assert!(self.is_locked(), "release of an unlocked TicketLock");
        self.head.fetch_add(1, Ordering::Release);
    }

    /// Acquire and return a guard releasing on drop
    pub fn lock(&self) -> TicketGuard<'_> {
        self.acquire();
        TicketGuard { lock: self }
    }

    /// Non-blocking variant of [`lock`](Self::lock)
    pub fn try_lock(&self) -> Option<TicketGuard<'_>> {
        if self.try_acquire() {
            Some(TicketGuard { lock: self })
        } else {
            None
        }
    }

    /// Whether some ticket is currently being served
    pub fn is_locked(&self) -> bool {
        self.queued() > 0
    }

    /// Tickets drawn but not yet released (holder plus waiters)
    pub fn queued(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        self.tail.load(Ordering::Acquire).wrapping_sub(head)
    }
}

impl Default for TicketLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TicketLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketLock")
            .field("queued", &self.queued())
            .finish()
    }
}

/// RAII guard for [`TicketLock`]
pub struct TicketGuard<'a> {
    lock: &'a TicketLock,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
