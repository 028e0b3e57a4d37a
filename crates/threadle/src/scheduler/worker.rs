//! Worker thread that services a prioritized list of queues
//!
//! Each worker polls its queues in priority order, runs the first task any
//! of them hands out, and backs off when all of them are idle.

use crate::backoff::BackoffPolicy;
use crate::scheduler::context::{self, ExecutionContext};
use crate::scheduler::registry::LiveWorkers;
use crate::scheduler::{Queue, QueueId};
use crate::sync::Guarded;
use crate::{Result, ThreadleError};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Stable numeric identity of a worker
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    pub(crate) fn from_usize(id: usize) -> Self {
        WorkerId(id)
    }

    /// Get the numeric ID value
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Per-thread loop bookkeeping
#[derive(Default)]
struct LoopState {
    /// Queue list as of `generation`
    snapshot: Vec<Arc<Queue>>,
    generation: Option<u64>,
    /// Queue whose context is installed on this thread
    last_queue: Option<QueueId>,
    /// Consecutive polls that found nothing
    idle: u32,
}

/// Worker that executes tasks from its attached queues
pub struct Worker {
    /// Worker ID
    id: WorkerId,

    /// Thread name
    name: String,

    /// Attached queues, lowest priority value first
    queues: Guarded<Vec<Arc<Queue>>>,

    /// Bumped whenever `queues` changes
    generation: AtomicU64,

    /// Idle policy
    backoff: BackoffPolicy,

    /// Number of workers alive in the owning registry
    live: LiveWorkers,

    /// Whether this worker is currently counted in `live`
    counted: AtomicBool,

    /// Identity of the thread running this worker
    thread_id: OnceCell<ThreadId>,

    /// Worker thread handle (`None` for adopted threads)
    handle: Mutex<Option<thread::JoinHandle<()>>>,

    /// Set once the parked thread may enter its poll loop
    launched: AtomicBool,

    /// Shutdown signal
    shutdown: AtomicBool,

    /// Tasks executed
    executed: AtomicU64,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        name: String,
        backoff: BackoffPolicy,
        live: LiveWorkers,
    ) -> Self {
        Self {
            id,
            name,
            queues: Guarded::new(Vec::new()),
            generation: AtomicU64::new(0),
            backoff,
            live,
            counted: AtomicBool::new(false),
            thread_id: OnceCell::new(),
            handle: Mutex::new(None),
            launched: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            executed: AtomicU64::new(0),
        }
    }

    /// Spawn the OS thread running the poll loop
    pub(crate) fn start(self: &Arc<Self>) -> Result<ThreadId> {
        let thread_id = self.spawn_parked()?;
        self.launch();
        Ok(thread_id)
    }

    /// Spawn the OS thread, holding it before its first poll until
    /// [`launch`](Self::launch) or [`stop`](Self::stop)
    pub(crate) fn spawn_parked(self: &Arc<Self>) -> Result<ThreadId> {
        self.enlist();
        let worker = self.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                while !worker.launched.load(Ordering::Acquire)
                    && !worker.shutdown.load(Ordering::Acquire)
                {
                    thread::park();
                }
                worker.run_loop();
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(error) => {
                self.delist();
                return Err(ThreadleError::Spawn(error));
            }
        };

        let thread_id = handle.thread().id();
        let _ = self.thread_id.set(thread_id);
        *self.handle.lock() = Some(handle);
        Ok(thread_id)
    }

    /// Let a thread from [`spawn_parked`](Self::spawn_parked) start polling
    pub(crate) fn launch(&self) {
        self.launched.store(true, Ordering::Release);
        self.unpark();
    }

    fn unpark(&self) {
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.thread().unpark();
        }
    }

    /// Bind this worker to the calling thread without spawning one
    pub(crate) fn adopt(&self) -> ThreadId {
        self.enlist();
        *self.thread_id.get_or_init(|| thread::current().id())
    }

    fn enlist(&self) {
        if !self.counted.swap(true, Ordering::AcqRel) {
            self.live.increment();
        }
    }

    fn delist(&self) {
        if self.counted.swap(false, Ordering::AcqRel) {
            self.live.decrement();
        }
    }

    /// Thread poll loop
    fn run_loop(&self) {
        let _ = self.thread_id.set(thread::current().id());
        tracing::debug!(worker = %self.name, "worker started");

        let mut state = LoopState::default();
        while !self.shutdown.load(Ordering::Acquire) {
            if self.poll_once(&mut state) {
                state.idle = 0;
            } else {
                self.backoff.step(state.idle, self.live.get()).wait();
                state.idle = state.idle.saturating_add(1);
            }
        }

        context::clear();
        self.delist();
        let drained = self.queues.replace(Vec::new()).len();
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(
            worker = %self.name,
            executed = self.executed(),
            drained,
            "worker stopped"
        );
    }

    /// Pull and run at most one task. Returns whether a task ran.
    fn poll_once(&self, state: &mut LoopState) -> bool {
        let generation = self.generation.load(Ordering::Acquire);
        if state.generation != Some(generation) {
            state.snapshot = self.queues.get();
            state.generation = Some(generation);
        }

        for queue in &state.snapshot {
            let Some(task) = queue.pull() else {
                continue;
            };
            if state.last_queue != Some(queue.id()) {
                context::install(ExecutionContext::new(queue.clone()));
                state.last_queue = Some(queue.id());
                tracing::trace!(worker = %self.name, queue = queue.name(), "switched queue");
            }
            // Failures are logged and the task disabled by the queue
            let _ = queue.execute(&task);
            self.executed.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Run up to `max_tasks` ready tasks on the calling thread, stopping early
    /// once every queue is idle. Returns how many ran.
    ///
    /// Meant for workers adopted from an existing thread (such as `main`),
    /// which have no loop of their own.
    pub fn run_pending(&self, max_tasks: usize) -> usize {
        let previous = ExecutionContext::current();
        let mut state = LoopState::default();
        let mut ran = 0;
        while ran < max_tasks && self.poll_once(&mut state) {
            ran += 1;
        }
        context::restore(previous);
        ran
    }

    /// Add `queue` to this worker's poll list.
    ///
    /// Queues are kept ordered by priority value, lowest first; queues with
    /// equal priority keep their attach order. Returns `false` if the queue
    /// was already attached.
    pub fn attach(&self, queue: Arc<Queue>) -> bool {
        let attached = self.queues.with(|queues| {
            if queues.iter().any(|q| q.id() == queue.id()) {
                return false;
            }
            let position = queues
                .iter()
                .position(|q| q.priority() > queue.priority())
                .unwrap_or(queues.len());
            queues.insert(position, queue);
            true
        });
        if attached {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        attached
    }

    /// Remove a queue from the poll list. A task of it already running finishes.
    pub fn detach(&self, queue: QueueId) -> bool {
        let detached = self.queues.with(|queues| {
            let before = queues.len();
            queues.retain(|q| q.id() != queue);
            queues.len() != before
        });
        if detached {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        detached
    }

    /// Whether `queue` is attached
    pub fn services(&self, queue: QueueId) -> bool {
        self.queues.with(|queues| queues.iter().any(|q| q.id() == queue))
    }

    /// Attached queues in poll order
    pub fn queues(&self) -> Vec<Arc<Queue>> {
        self.queues.get()
    }

    /// Signal the loop to exit after its current task
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.unpark();
    }

    /// Stop the worker and wait for its thread to exit.
    ///
    /// Joining an adopted worker only clears its queue list. Joining from the
    /// worker's own thread fails with [`ThreadleError::JoinSelf`].
    pub fn join(&self) -> Result<()> {
        if self.is_current_thread() && self.handle.lock().is_some() {
            return Err(ThreadleError::JoinSelf(self.id));
        }
        self.stop();

        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| ThreadleError::WorkerPanicked(self.id)),
            None => {
                self.delist();
                if !self.queues.replace(Vec::new()).is_empty() {
                    self.generation.fetch_add(1, Ordering::AcqRel);
                }
                Ok(())
            }
        }
    }

    /// Get the worker ID
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Get the worker (thread) name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the thread running this worker, once known
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id.get().copied()
    }

    /// Whether the calling thread is this worker's thread
    pub fn is_current_thread(&self) -> bool {
        self.thread_id() == Some(thread::current().id())
    }

    /// Check if the worker is running
    pub fn is_running(&self) -> bool {
        self.thread_id.get().is_some() && !self.shutdown.load(Ordering::Acquire)
    }

    /// Tasks executed by this worker
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.get_mut().take() {
            // The last reference may be dropped by the worker thread itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
