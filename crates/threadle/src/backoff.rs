//! Backoff policies for spinning waits
//!
//! Every bounded wait in the crate asks one of these functions what to do on
//! its Nth iteration and then performs the returned [`BackoffStep`]. Ticket
//! lock waiters and `send` callers use [`lock_backoff`]; idle workers use a
//! [`BackoffPolicy`]. Keeping the decision separate
//! from the waiting makes the escalation testable without threads.

use crate::{Result, ThreadleError};
use std::thread;
use std::time::Duration;

/// Ticket lock iterations spent yielding before the first sleep
pub const LOCK_YIELD_LIMIT: u32 = 32;

/// Ticket lock iterations after which waiters switch to the long sleep
pub const LOCK_SLEEP_THRESHOLD: u32 = 512;

/// Short sleep used by lock waiters between the yield and long phases
pub const LOCK_SHORT_SLEEP: Duration = Duration::from_micros(20);

/// Long sleep used by lock waiters that have been queued for a while
pub const LOCK_LONG_SLEEP: Duration = Duration::from_millis(1);

/// A single waiting action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Busy-spin with a CPU hint
    Spin,
    /// Give the rest of the time slice away
    Yield,
    /// Sleep for the given duration
    Sleep(Duration),
}

impl BackoffStep {
    /// Perform the wait
    pub fn wait(self) {
        match self {
            BackoffStep::Spin => std::hint::spin_loop(),
            BackoffStep::Yield => thread::yield_now(),
            BackoffStep::Sleep(duration) => thread::sleep(duration),
        }
    }
}

/// Escalation for ticket lock waiters.
///
/// A handful of spins, then yields, then short sleeps, and finally long
/// sleeps once a waiter has been queued past [`LOCK_SLEEP_THRESHOLD`].
pub fn lock_backoff(iteration: u32) -> BackoffStep {
    if iteration < 4 {
        BackoffStep::Spin
    } else if iteration < LOCK_YIELD_LIMIT {
        BackoffStep::Yield
    } else if iteration < LOCK_SLEEP_THRESHOLD {
        BackoffStep::Sleep(LOCK_SHORT_SLEEP)
    } else {
        BackoffStep::Sleep(LOCK_LONG_SLEEP)
    }
}

/// Idle policy for workers that found nothing to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Sleep taken every fifth idle iteration
    pub short_sleep: Duration,

    /// Long sleep per live worker once idle iterations exceed the worker count
    pub long_sleep_per_worker: Duration,

    /// Upper bound for the scaled long sleep
    pub long_sleep_cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            short_sleep: Duration::from_micros(50),
            long_sleep_per_worker: Duration::from_micros(250),
            long_sleep_cap: Duration::from_millis(4),
        }
    }
}

impl BackoffPolicy {
    /// A policy tuned for latency over CPU use (tests, interactive tools)
    pub fn responsive() -> Self {
        Self {
            short_sleep: Duration::from_micros(10),
            long_sleep_per_worker: Duration::from_micros(50),
            long_sleep_cap: Duration::from_millis(1),
        }
    }

    /// Check the policy for values that would make workers spin forever
    pub fn validate(&self) -> Result<()> {
        if self.long_sleep_cap.is_zero() {
            return Err(ThreadleError::Configuration(
                "backoff long_sleep_cap must be positive".to_string(),
            ));
        }
        if self.long_sleep_per_worker > self.long_sleep_cap {
            return Err(ThreadleError::Configuration(format!(
                "backoff long_sleep_per_worker ({:?}) exceeds long_sleep_cap ({:?})",
                self.long_sleep_per_worker, self.long_sleep_cap
            )));
        }
        Ok(())
    }

    /// Decide the wait for idle iteration `iteration` with `live_workers` running.
    ///
    /// Yield most iterations, short sleep every fifth, and once the iteration
    /// count exceeds the number of live workers sleep proportionally to the
    /// pool size so a growing pool polls queues less aggressively.
    pub fn step(&self, iteration: u32, live_workers: usize) -> BackoffStep {
        let workers = live_workers.max(1);
        if iteration as usize > workers {
            let scaled = self
                .long_sleep_per_worker
                .saturating_mul(workers.min(u32::MAX as usize) as u32);
            BackoffStep::Sleep(scaled.min(self.long_sleep_cap))
        } else if iteration % 5 == 4 {
            BackoffStep::Sleep(self.short_sleep)
        } else {
            BackoffStep::Yield
        }
    }
}
