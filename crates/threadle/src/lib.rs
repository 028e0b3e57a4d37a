//! Threadle cooperative scheduling runtime
//!
//! This crate provides:
//! - Fair locks (ticket, deferred-callback, hooked, reader/writer)
//! - Task queues with Immediate, Sequential and Periodic policies
//! - Worker threads multiplexing queues by priority
//! - Execution contexts for resuming work on a specific queue
//!
//! Start with [`Runtime`], which owns the workers and a default queue.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backoff;
pub mod config;
pub mod runtime;
pub mod scheduler;
pub mod sync;

pub use backoff::{BackoffPolicy, BackoffStep};
pub use config::RuntimeConfig;
pub use runtime::Runtime;
pub use scheduler::{
    Clock, ExecutionContext, LiveWorkers, ManualClock, PolicyKind, Queue, QueueId, QueueStats,
    SystemClock, Task, TaskError, TaskHandle, TaskId, TaskResult, Worker, WorkerId,
    WorkerRegistry,
};
pub use sync::{
    Access, DeferredLock, Guarded, GuardedRef, HookedLock, ReadWriteLock, SyncError, TicketGuard,
    TicketLock,
};

use std::time::Duration;

/// Runtime errors
#[derive(Debug, thiserror::Error)]
pub enum ThreadleError {
    /// Invalid construction parameters
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A continuation passed to `send` failed
    #[error("Continuation on queue '{queue}' failed: {source}")]
    Bridge {
        /// Queue the continuation ran on
        queue: String,
        /// Failure reported by the continuation
        #[source]
        source: TaskError,
    },

    /// A continuation passed to `send_timeout` did not finish in time
    #[error("Continuation on queue '{queue}' timed out after {timeout:?}")]
    BridgeTimeout {
        /// Queue the continuation was submitted to
        queue: String,
        /// Time waited
        timeout: Duration,
    },

    /// No worker services the queue
    #[error("No worker services {0}")]
    NotAttached(QueueId),

    /// A worker thread panicked outside any task
    #[error("{0} panicked")]
    WorkerPanicked(WorkerId),

    /// A worker tried to join itself
    #[error("{0} cannot join itself")]
    JoinSelf(WorkerId),

    /// Spawning a worker thread failed
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Lock misuse
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Runtime result
pub type Result<T> = std::result::Result<T, ThreadleError>;
