//! Named, prioritized task queues ("needles")

use crate::scheduler::policy::{Policy, PolicyKind};
use crate::scheduler::{Clock, ExecutionContext, SystemClock, Task, TaskHandle, TaskResult};
use crate::sync::Guarded;
use crate::Result;
use crossbeam::atomic::AtomicCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pause state of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pause {
    Off,
    Until(Instant),
    /// Requested duration is past what the clock can represent
    Indefinite,
}

/// Unique identifier for a Queue
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(u64);

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

impl QueueId {
    /// Generate a new unique QueueId
    pub fn new() -> Self {
        QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue-{}", self.0)
    }
}

/// Queue statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Executions that returned successfully
    pub executed: u64,

    /// Executions that failed (each disabled its task)
    pub failed: u64,

    /// Tasks dropped unrun by `dispose`
    pub discarded: u64,

    /// Buffer flips (periodic queues only)
    pub flips: u64,

    /// Tasks currently stored
    pub count: usize,
}

/// A named, prioritized container of tasks governed by one policy.
///
/// Workers call [`pull`](Self::pull) to obtain the next task the policy
/// allows and hand it back to [`execute`](Self::execute). Lower priority
/// values are polled first by every worker the queue is attached to.
pub struct Queue {
    /// Unique queue ID
    id: QueueId,

    /// Human-readable name used in logs
    name: String,

    /// Poll order on workers; lower runs first
    priority: i32,

    /// Time source for pauses, deltas and ticks
    clock: Arc<dyn Clock>,

    /// Policy storage behind the queue lock
    state: Guarded<Policy>,

    /// No pulls succeed before this instant
    paused_until: AtomicCell<Pause>,

    executed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl Queue {
    /// Create a queue with an explicit policy and clock.
    ///
    /// Fails with [`Configuration`](crate::ThreadleError::Configuration) for a
    /// periodic policy with a zero tick.
    pub fn with_clock(
        name: impl Into<String>,
        priority: i32,
        kind: PolicyKind,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        let policy = Policy::new(kind, clock.now())?;
        Ok(Self::build(name.into(), priority, policy, clock))
    }

    /// Fire-when-ready queue on the system clock
    pub fn immediate(name: impl Into<String>, priority: i32) -> Arc<Self> {
        Self::immediate_with_clock(name, priority, Arc::new(SystemClock))
    }

    /// Fire-when-ready queue on `clock`
    pub fn immediate_with_clock(
        name: impl Into<String>,
        priority: i32,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let policy = Policy::immediate(clock.now());
        Self::build(name.into(), priority, policy, clock)
    }

    /// Single-file queue on the system clock
    pub fn sequential(name: impl Into<String>, priority: i32) -> Arc<Self> {
        Self::sequential_with_clock(name, priority, Arc::new(SystemClock))
    }

    /// Single-file queue on `clock`
    pub fn sequential_with_clock(
        name: impl Into<String>,
        priority: i32,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let policy = Policy::sequential(clock.now());
        Self::build(name.into(), priority, policy, clock)
    }

    /// Fixed-tick queue on the system clock
    pub fn periodic(name: impl Into<String>, priority: i32, tick: Duration) -> Result<Arc<Self>> {
        Self::with_clock(name, priority, PolicyKind::Periodic { tick }, Arc::new(SystemClock))
    }

    /// Fixed-tick queue with the tick given in seconds
    pub fn periodic_secs(name: impl Into<String>, priority: i32, secs: f64) -> Result<Arc<Self>> {
        Self::with_clock(name, priority, PolicyKind::periodic_secs(secs)?, Arc::new(SystemClock))
    }

    fn build(name: String, priority: i32, policy: Policy, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            id: QueueId::new(),
            name,
            priority,
            clock,
            state: Guarded::new(policy),
            paused_until: AtomicCell::new(Pause::Off),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        })
    }

    /// Get the queue ID
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Get the queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the queue priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Get the policy
    pub fn kind(&self) -> PolicyKind {
        self.state.lock().kind()
    }

    /// Queue `work` to run once
    pub fn submit_once<F>(&self, work: F) -> TaskHandle
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.submit(Task::once(work))
    }

    /// Queue `work` to run repeatedly until removed
    pub fn submit_recurring<F>(&self, work: F) -> TaskHandle
    where
        F: FnMut() -> TaskResult + Send + 'static,
    {
        self.submit(Task::recurring(work))
    }

    fn submit(&self, task: Arc<Task>) -> TaskHandle {
        let handle = TaskHandle::new(task.clone());
        self.state.lock().submit(task);
        handle
    }

    /// Take the next task the policy allows, marking it dispatched
    pub fn pull(&self) -> Option<Arc<Task>> {
        let now = self.clock.now();
        match self.paused_until.load() {
            Pause::Off => {}
            Pause::Indefinite => return None,
            Pause::Until(until) if now < until => return None,
            expired @ Pause::Until(_) => {
                let _ = self.paused_until.compare_exchange(expired, Pause::Off);
            }
        }
        self.state.lock().pull(now)
    }

    /// Run a dispatched task and return it to idle.
    ///
    /// A failure is logged and disables the task; it never propagates to the
    /// caller's control flow beyond the returned value.
    pub fn execute(&self, task: &Task) -> TaskResult {
        let result = task.run();
        match &result {
            Ok(()) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                task.disable();
                tracing::warn!(
                    queue = %self.name,
                    task = %task.id(),
                    recurring = task.is_recurring(),
                    %error,
                    "task failed and was disabled"
                );
            }
        }
        task.finish();
        result
    }

    /// Stop handing out tasks for `duration`. Tasks already running finish.
    ///
    /// A duration too large for the clock pauses until [`resume`](Self::resume).
    pub fn pause(&self, duration: Duration) {
        let pause = match self.clock.now().checked_add(duration) {
            Some(until) => Pause::Until(until),
            None => Pause::Indefinite,
        };
        self.paused_until.store(pause);
    }

    /// Lift a pause early
    pub fn resume(&self) {
        self.paused_until.store(Pause::Off);
    }

    /// Whether a pause is in effect
    pub fn is_paused(&self) -> bool {
        match self.paused_until.load() {
            Pause::Off => false,
            Pause::Indefinite => true,
            Pause::Until(until) => self.clock.now() < until,
        }
    }

    /// Number of stored tasks (in-flight one-shot tasks are not counted)
    pub fn count(&self) -> usize {
        self.state.lock().count()
    }

    /// Time between the policy's last two full cycles (flips for periodic queues)
    pub fn delta(&self) -> Duration {
        self.state.lock().delta()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> QueueStats {
        let (count, flips) = self.state.with(|policy| (policy.count(), policy.flips()));
        QueueStats {
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            flips,
            count,
        }
    }

    /// Discard every queued task without running it; returns how many.
    ///
    /// Tasks already dispatched run to completion. The queue stays usable.
    pub fn dispose(&self) -> usize {
        let discarded = self.state.lock().drain();
        self.discarded.fetch_add(discarded as u64, Ordering::Relaxed);
        if discarded > 0 {
            tracing::debug!(queue = %self.name, discarded, "queue disposed with pending tasks");
        }
        discarded
    }

    /// Execution context resuming continuations on this queue
    pub fn context(self: &Arc<Self>) -> ExecutionContext {
        ExecutionContext::new(self.clone())
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}
