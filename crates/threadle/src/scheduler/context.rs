//! Execution context bridge
//!
//! Lets continuation-style code resume on a specific queue. Workers install
//! the context of the queue they are about to run as the thread's current
//! context, so code running inside a task can find its way back.

use crate::backoff::lock_backoff;
use crate::scheduler::task::catch_task;
use crate::scheduler::{Queue, TaskError, TaskHandle, TaskResult};
use crate::{Result, ThreadleError};
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

thread_local! {
    static CURRENT: RefCell<Option<ExecutionContext>> = const { RefCell::new(None) };
    static SWITCHED_AT: Cell<Option<Instant>> = const { Cell::new(None) };
}

/// Handle that schedules continuations on one queue
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    queue: Arc<Queue>,
}

/// Completion slot shared between a `send` caller and the task running its continuation
struct SendSlot<R> {
    done: AtomicBool,
    result: Mutex<Option<std::result::Result<R, TaskError>>>,
}

impl ExecutionContext {
    /// Context for `queue`
    pub fn new(queue: Arc<Queue>) -> Self {
        Self { queue }
    }

    /// The owning queue
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Context installed on the calling thread, if it is running a queue's task
    pub fn current() -> Option<Self> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// When the calling thread last switched to a different queue
    pub fn switched_at() -> Option<Instant> {
        SWITCHED_AT.with(Cell::get)
    }

    /// Whether the calling thread is currently executing this context's queue
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|ctx| ctx.queue.id() == self.queue.id())
        })
    }

    /// Enqueue `continuation` as a one-shot task and return immediately
    pub fn post<F>(&self, continuation: F) -> TaskHandle
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.queue.submit_once(continuation)
    }

    /// Run `continuation` on the owning queue and block until it finishes.
    ///
    /// A failure inside the continuation (error or panic) is returned as
    /// [`ThreadleError::Bridge`]. Called from a task already running on this
    /// queue, the continuation runs inline instead of waiting on itself.
    pub fn send<F, R>(&self, continuation: F) -> Result<R>
    where
        F: FnOnce() -> std::result::Result<R, TaskError> + Send + 'static,
        R: Send + 'static,
    {
        self.send_inner(continuation, None)
    }

    /// Like [`send`](Self::send), giving up after `timeout`.
    ///
    /// On timeout the continuation is flagged for removal; if a worker has
    /// already started it, it still runs to completion.
    pub fn send_timeout<F, R>(&self, continuation: F, timeout: Duration) -> Result<R>
    where
        F: FnOnce() -> std::result::Result<R, TaskError> + Send + 'static,
        R: Send + 'static,
    {
        self.send_inner(continuation, Some(timeout))
    }

    fn send_inner<F, R>(&self, continuation: F, timeout: Option<Duration>) -> Result<R>
    where
        F: FnOnce() -> std::result::Result<R, TaskError> + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return self.bridge(run_captured(continuation));
        }

        let slot = Arc::new(SendSlot {
            done: AtomicBool::new(false),
            result: Mutex::new(None),
        });
        let handle = {
            let slot = slot.clone();
            self.queue.submit_once(move || {
                let result = run_captured(continuation);
                *slot.result.lock() = Some(result);
                slot.done.store(true, Ordering::Release);
                Ok(())
            })
        };

        let started = Instant::now();
        let mut iteration: u32 = 0;
        while !slot.done.load(Ordering::Acquire) {
            if let Some(timeout) = timeout {
                if started.elapsed() >= timeout {
                    handle.remove();
                    return Err(ThreadleError::BridgeTimeout {
                        queue: self.queue.name().to_string(),
                        timeout,
                    });
                }
            }
            lock_backoff(iteration).wait();
            iteration = iteration.saturating_add(1);
        }

        let result = slot.result.lock().take().unwrap_or_else(|| {
            Err(TaskError::msg("continuation completed without a result"))
        });
        self.bridge(result)
    }

    fn bridge<R>(&self, result: std::result::Result<R, TaskError>) -> Result<R> {
        result.map_err(|source| ThreadleError::Bridge {
            queue: self.queue.name().to_string(),
            source,
        })
    }
}

fn run_captured<F, R>(continuation: F) -> std::result::Result<R, TaskError>
where
    F: FnOnce() -> std::result::Result<R, TaskError>,
{
    let mut output = None;
    catch_task(|| {
        output = Some(continuation()?);
        Ok(())
    })
    .and_then(|()| output.ok_or_else(|| TaskError::msg("continuation produced no value")))
}

/// Make `ctx` the calling thread's current context, returning the previous one
pub(crate) fn install(ctx: ExecutionContext) -> Option<ExecutionContext> {
    SWITCHED_AT.with(|at| at.set(Some(Instant::now())));
    CURRENT.with(|current| current.borrow_mut().replace(ctx))
}

/// Put back a context saved by [`install`]
pub(crate) fn restore(previous: Option<ExecutionContext>) {
    CURRENT.with(|current| *current.borrow_mut() = previous);
}

/// Forget the calling thread's context
pub(crate) fn clear() {
    restore(None);
    SWITCHED_AT.with(|at| at.set(None));
}
