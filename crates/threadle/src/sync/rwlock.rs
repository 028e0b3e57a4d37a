//! Reader/writer lock built on the ticket lock

use crate::backoff::lock_backoff;
use crate::sync::Guarded;
use std::fmt;

/// Which side of a [`ReadWriteLock`] an operation concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Shared
    Read,
    /// Exclusive
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

/// Errors from lock misuse
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Released a side of the lock that was not held
    #[error("{0} lock released while not held")]
    NotHeld(Access),
}

#[derive(Debug, Default)]
struct RwState {
    read_locked: bool,
    write_locked: bool,
    /// A writer has claimed the lock and is waiting for readers to leave
    write_pending: bool,
    reader_count: usize,
}

/// Many readers or one writer.
///
/// A waiting writer blocks new readers, so writers cannot starve.
#[derive(Debug, Default)]
pub struct ReadWriteLock {
    state: Guarded<RwState>,
}

impl ReadWriteLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter as a reader unless a writer holds or is waiting for the lock
    pub fn try_acquire_read(&self) -> bool {
        self.state.with(|state| {
            if state.write_locked || state.write_pending {
                return false;
            }
            state.read_locked = true;
            state.reader_count += 1;
            true
        })
    }

    /// Become the writer if there are no readers and no other writer
    pub fn try_acquire_write(&self) -> bool {
        self.state.with(|state| {
            if state.write_locked || state.write_pending || state.reader_count > 0 {
                return false;
            }
            state.write_locked = true;
            true
        })
    }

    /// Block until entered as a reader
    pub fn acquire_read(&self) {
        let mut iteration: u32 = 0;
        while !self.try_acquire_read() {
            lock_backoff(iteration).wait();
            iteration = iteration.saturating_add(1);
        }
    }

    /// Block until this caller is the only writer and all readers have left
    pub fn acquire_write(&self) {
        let mut iteration: u32 = 0;
        // Claim the writer slot first so no new readers get in
        loop {
            let claimed = self.state.with(|state| {
                if state.write_locked || state.write_pending {
                    return false;
                }
                state.write_pending = true;
                true
            });
            if claimed {
                break;
            }
            lock_backoff(iteration).wait();
            iteration = iteration.saturating_add(1);
        }

        iteration = 0;
        loop {
            let acquired = self.state.with(|state| {
                if state.reader_count > 0 {
                    return false;
                }
                state.write_pending = false;
                state.write_locked = true;
                true
            });
            if acquired {
                return;
            }
            lock_backoff(iteration).wait();
            iteration = iteration.saturating_add(1);
        }
    }

    /// Leave as a reader
    pub fn release_read(&self) -> Result<(), SyncError> {
        self.state.with(|state| {
            if state.reader_count == 0 {
                return Err(SyncError::NotHeld(Access::Read));
            }
            state.reader_count -= 1;
            if state.reader_count == 0 {
                state.read_locked = false;
            }
            Ok(())
        })
    }

    /// Give up the writer role
    pub fn release_write(&self) -> Result<(), SyncError> {
        self.state.with(|state| {
            if !state.write_locked {
                return Err(SyncError::NotHeld(Access::Write));
            }
            state.write_locked = false;
            Ok(())
        })
    }

    /// Readers currently inside
    pub fn reader_count(&self) -> usize {
        self.state.with(|state| state.reader_count)
    }

    /// Whether any reader is inside
    pub fn is_read_locked(&self) -> bool {
        self.state.with(|state| state.read_locked)
    }

    /// Whether a writer holds the lock
    pub fn is_write_locked(&self) -> bool {
        self.state.with(|state| state.write_locked)
    }
}
