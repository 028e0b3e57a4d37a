//! Task structure and execution flags

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of one task execution
pub type TaskResult = std::result::Result<(), TaskError>;

/// Boxed task body. One-shot bodies are adapted to `FnMut` internally.
pub(crate) type Work = Box<dyn FnMut() -> TaskResult + Send>;

/// Failure escaping a task body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The body returned an error
    #[error("{0}")]
    Failed(String),

    /// The body panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Build a failure from any displayable message
    pub fn msg(message: impl fmt::Display) -> Self {
        TaskError::Failed(message.to_string())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::Failed(message.to_string())
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::Failed(message)
    }
}

/// Run a closure, turning a panic into [`TaskError::Panicked`]
pub(crate) fn catch_task<F>(f: F) -> TaskResult
where
    F: FnOnce() -> TaskResult,
{
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)))
}

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A unit of work held by a [`Queue`](crate::scheduler::Queue).
///
/// State machine: idle (`ready`) → dispatched (`!ready`) while a worker runs
/// it → idle again if recurring, otherwise gone. Removal and disabling are
/// flags only; the owning queue excises the task on a later scan.
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// Stays queued after running
    recurring: bool,

    /// Not currently executing
    ready: AtomicBool,

    /// Excise on the next scan that finds the task idle
    remove_requested: AtomicBool,

    /// Cleared when the task is disabled (failure or explicit stop)
    to_run: AtomicBool,

    /// Completed executions
    runs: AtomicU64,

    /// Task body
    work: Mutex<Work>,
}

impl Task {
    /// Create a one-shot task
    pub(crate) fn once<F>(work: F) -> Arc<Self>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let mut slot = Some(work);
        Self::with_work(
            false,
            Box::new(move || match slot.take() {
                Some(work) => work(),
                None => Ok(()),
            }),
        )
    }

    /// Create a recurring task
    pub(crate) fn recurring<F>(work: F) -> Arc<Self>
    where
        F: FnMut() -> TaskResult + Send + 'static,
    {
        Self::with_work(true, Box::new(work))
    }

    fn with_work(recurring: bool, work: Work) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::new(),
            recurring,
            ready: AtomicBool::new(true),
            remove_requested: AtomicBool::new(false),
            to_run: AtomicBool::new(true),
            runs: AtomicU64::new(0),
            work: Mutex::new(work),
        })
    }

    /// Get the Task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the task stays queued after running
    pub fn is_recurring(&self) -> bool {
        self.recurring
    }

    /// Not currently executing on any worker
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Removal has been requested
    pub fn is_remove_requested(&self) -> bool {
        self.remove_requested.load(Ordering::Acquire)
    }

    /// Not disabled
    pub fn is_enabled(&self) -> bool {
        self.to_run.load(Ordering::Acquire)
    }

    /// Number of completed executions
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    /// Eligible for dispatch
    pub(crate) fn is_runnable(&self) -> bool {
        self.is_ready() && self.is_enabled() && !self.is_remove_requested()
    }

    /// Flagged for removal and idle, so it can be excised now
    pub(crate) fn is_sweepable(&self) -> bool {
        self.is_remove_requested() && self.is_ready()
    }

    /// Mark the task as executing. Fails if another worker already has it.
    pub(crate) fn dispatch(&self) -> bool {
        self.ready
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Execute the body once. The task must have been dispatched.
    pub(crate) fn run(&self) -> TaskResult {
        debug_assert!(!self.is_ready(), "running a task that was not dispatched");
        let mut work = self.work.lock();
        let result = catch_task(|| (*work)());
        self.runs.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Return the task to idle after an execution
    pub(crate) fn finish(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn disable(&self) {
        self.to_run.store(false, Ordering::Release);
    }

    pub(crate) fn enable(&self) {
        self.to_run.store(true, Ordering::Release);
    }

    pub(crate) fn request_removal(&self) {
        self.remove_requested.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("recurring", &self.recurring)
            .field("ready", &self.is_ready())
            .field("remove_requested", &self.is_remove_requested())
            .field("to_run", &self.is_enabled())
            .field("runs", &self.run_count())
            .finish()
    }
}

/// Caller-side handle to a submitted task
#[derive(Clone, Debug)]
pub struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    /// Get the task ID
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Request lazy removal. A run already in progress completes; the task
    /// is excised the next time its queue scans it while idle.
    pub fn remove(&self) {
        self.task.request_removal();
    }

    /// Disable the task without removing it
    pub fn stop(&self) {
        self.task.disable();
    }

    /// Re-enable a stopped task (including one disabled after a failure)
    pub fn resume(&self) {
        self.task.enable();
    }

    /// Whether the task is disabled
    pub fn is_stopped(&self) -> bool {
        !self.task.is_enabled()
    }

    /// Whether removal was requested
    pub fn is_removed(&self) -> bool {
        self.task.is_remove_requested()
    }

    /// Not currently executing
    pub fn is_ready(&self) -> bool {
        self.task.is_ready()
    }

    /// Whether the task stays queued after running
    pub fn is_recurring(&self) -> bool {
        self.task.is_recurring()
    }

    /// Number of completed executions
    pub fn run_count(&self) -> u64 {
        self.task.run_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_task_id_uniqueness() {
        let id1 = TaskId::new();
        let id2 = TaskId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_one_shot_body_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = {
            let calls = calls.clone();
            Task::once(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        assert!(!task.is_recurring());
        assert!(task.dispatch());
        assert!(task.run().is_ok());
        assert!(task.run().is_ok());
        task.finish();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(task.run_count(), 2);
    }

    #[test]
    fn test_dispatch_is_exclusive() {
        let task = Task::recurring(|| Ok(()));
        assert!(task.dispatch());
        assert!(!task.is_ready());
        assert!(!task.dispatch());
        task.finish();
        assert!(task.is_ready());
        assert!(task.dispatch());
    }

    #[test]
    fn test_run_captures_panic() {
        let task = Task::recurring(|| panic!("boom"));
        assert!(task.dispatch());
        let result = task.run();
        assert_eq!(result, Err(TaskError::Panicked("boom".to_string())));
    }

    #[test]
    fn test_runnable_flags() {
        let task = Task::recurring(|| Ok(()));
        let handle = TaskHandle::new(task.clone());
        assert!(task.is_runnable());

        handle.stop();
        assert!(handle.is_stopped());
        assert!(!task.is_runnable());

        handle.resume();
        assert!(task.is_runnable());

        handle.remove();
        assert!(handle.is_removed());
        assert!(!task.is_runnable());
        assert!(task.is_sweepable());

        task.dispatch();
        assert!(!task.is_sweepable());
    }

    #[test]
    fn test_task_error_conversions() {
        assert_eq!(TaskError::from("bad"), TaskError::Failed("bad".to_string()));
        assert_eq!(TaskError::msg(42).to_string(), "42");
        assert_eq!(
            TaskError::Panicked("x".to_string()).to_string(),
            "task panicked: x"
        );
    }
}
