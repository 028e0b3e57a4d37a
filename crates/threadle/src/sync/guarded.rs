//! Values protected by a ticket lock

use crate::sync::TicketLock;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

/// A value only reachable while holding its [`TicketLock`].
///
/// Used for queue task storage and the worker table, where the fairness of
/// the ticket lock keeps one busy worker from starving the others.
pub struct Guarded<T> {
    lock: TicketLock,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `lock`.
unsafe impl<T: Send> Send for Guarded<T> {}
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    /// Wrap a value
    pub const fn new(value: T) -> Self {
        Self {
            lock: TicketLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Block until the value is available
    pub fn lock(&self) -> GuardedRef<'_, T> {
        self.lock.acquire();
        GuardedRef { owner: self }
    }

    /// Borrow the value if nobody holds or waits for it
    pub fn try_lock(&self) -> Option<GuardedRef<'_, T>> {
        if self.lock.try_acquire() {
            Some(GuardedRef { owner: self })
        } else {
            None
        }
    }

    /// Run `f` with exclusive access
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Overwrite the value
    pub fn set(&self, value: T) {
        *self.lock() = value;
    }

    /// Swap in a new value, returning the old one
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.lock(), value)
    }

    /// Mutable access without locking; `&mut self` proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consume and return the value
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Clone> Guarded<T> {
    /// Clone the value out
    pub fn get(&self) -> T {
        self.lock().clone()
    }
}

impl<T: Default> Default for Guarded<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guarded").field("lock", &self.lock).finish()
    }
}

/// Exclusive borrow of a [`Guarded`] value, released on drop
pub struct GuardedRef<'a, T> {
    owner: &'a Guarded<T>,
}

impl<T> Deref for GuardedRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.owner.value.get() }
    }
}

impl<T> DerefMut for GuardedRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock.
        unsafe { &mut *self.owner.value.get() }
    }
}

impl<T> Drop for GuardedRef<'_, T> {
    fn drop(&mut self) {
        self.owner.lock.release();
    }
}
