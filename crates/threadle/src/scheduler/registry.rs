//! Table of workers keyed by thread identity

use crate::backoff::BackoffPolicy;
use crate::scheduler::{ExecutionContext, Queue, QueueId, Worker, WorkerId};
use crate::sync::Guarded;
use crate::{Result, ThreadleError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Shared count of workers currently alive.
///
/// Workers hold a clone instead of a reference to their registry; backoff and
/// lock diagnostics scale with it.
#[derive(Debug, Clone, Default)]
pub struct LiveWorkers(Arc<AtomicUsize>);

impl LiveWorkers {
    /// Current number of live workers
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Registry of all workers of a runtime
pub struct WorkerRegistry {
    /// Workers in creation order
    workers: Guarded<Vec<Arc<Worker>>>,

    /// Thread identity to worker
    by_thread: DashMap<ThreadId, Arc<Worker>>,

    /// Live worker count shared with every worker
    live: LiveWorkers,

    /// Next worker ID
    next_id: AtomicUsize,

    /// Prefix for spawned thread names
    thread_name_prefix: String,

    /// Idle policy handed to new workers
    backoff: BackoffPolicy,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new(thread_name_prefix: impl Into<String>, backoff: BackoffPolicy) -> Self {
        Self {
            workers: Guarded::new(Vec::new()),
            by_thread: DashMap::new(),
            live: LiveWorkers::default(),
            next_id: AtomicUsize::new(0),
            thread_name_prefix: thread_name_prefix.into(),
            backoff,
        }
    }

    fn create(&self) -> Arc<Worker> {
        let id = WorkerId::from_usize(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = format!("{}-{}", self.thread_name_prefix, id.as_usize());
        Arc::new(Worker::new(id, name, self.backoff, self.live.clone()))
    }

    fn register(&self, worker: &Arc<Worker>, thread_id: ThreadId) {
        self.workers.lock().push(worker.clone());
        self.by_thread.insert(thread_id, worker.clone());
    }

    fn unregister(&self, worker: &Worker) {
        self.workers.with(|workers| workers.retain(|w| w.id() != worker.id()));
        if let Some(thread_id) = worker.thread_id() {
            self.by_thread.remove(&thread_id);
        }
    }

    /// Start a new worker thread with no queues attached
    pub fn spawn(&self) -> Result<Arc<Worker>> {
        self.spawn_with(std::iter::empty())
    }

    /// Start a new worker thread servicing `queues` from its first poll.
    ///
    /// The worker is registered before it polls, so its first task already
    /// sees itself through [`current_worker`](Self::current_worker).
    pub fn spawn_with<I>(&self, queues: I) -> Result<Arc<Worker>>
    where
        I: IntoIterator<Item = Arc<Queue>>,
    {
        let worker = self.create();
        for queue in queues {
            worker.attach(queue);
        }
        let thread_id = worker.spawn_parked()?;
        self.register(&worker, thread_id);
        worker.launch();
        tracing::debug!(worker = worker.name(), live = self.live.get(), "worker spawned");
        Ok(worker)
    }

    /// Register the calling thread as a worker without spawning one.
    ///
    /// The returned worker has no loop; drive it with
    /// [`Worker::run_pending`]. Calling this again from the same thread
    /// returns the existing worker.
    pub fn adopt_current_thread(&self) -> Arc<Worker> {
        if let Some(existing) = self.current_worker() {
            return existing;
        }
        let worker = self.create();
        let thread_id = worker.adopt();
        self.register(&worker, thread_id);
        tracing::debug!(worker = worker.name(), "adopted current thread");
        worker
    }

    /// Worker running on the calling thread
    pub fn current_worker(&self) -> Option<Arc<Worker>> {
        self.by_thread
            .get(&thread::current().id())
            .map(|entry| entry.value().clone())
    }

    /// Queue whose task the calling worker thread is executing
    pub fn current_queue(&self) -> Option<Arc<Queue>> {
        self.current_worker()?;
        ExecutionContext::current().map(|ctx| ctx.queue().clone())
    }

    /// Look up a worker by ID
    pub fn get(&self, id: WorkerId) -> Option<Arc<Worker>> {
        self.workers
            .with(|workers| workers.iter().find(|w| w.id() == id).cloned())
    }

    /// All registered workers in creation order
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.get()
    }

    /// Number of registered workers
    pub fn len(&self) -> usize {
        self.workers.with(|workers| workers.len())
    }

    /// Whether no worker is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared live worker count
    pub fn live_workers(&self) -> LiveWorkers {
        self.live.clone()
    }

    /// Attach `queue` to every registered worker; returns how many took it
    pub fn attach_all(&self, queue: &Arc<Queue>) -> usize {
        self.workers()
            .iter()
            .filter(|worker| worker.attach(queue.clone()))
            .count()
    }

    /// Workers that have `queue` attached
    pub fn workers_for(&self, queue: QueueId) -> Vec<Arc<Worker>> {
        self.workers
            .with(|workers| workers.iter().filter(|w| w.services(queue)).cloned().collect())
    }

    /// Stop and join every worker servicing `queue`.
    ///
    /// Fails with [`ThreadleError::NotAttached`] if no worker services it.
    pub fn join_queue(&self, queue: QueueId) -> Result<()> {
        let workers = self.workers_for(queue);
        if workers.is_empty() {
            return Err(ThreadleError::NotAttached(queue));
        }
        let mut first_error = None;
        for worker in workers {
            if let Err(error) = self.join_worker(&worker) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop and join one worker
    pub fn join(&self, id: WorkerId) -> Result<()> {
        match self.get(id) {
            Some(worker) => self.join_worker(&worker),
            None => Ok(()),
        }
    }

    fn join_worker(&self, worker: &Arc<Worker>) -> Result<()> {
        let result = worker.join();
        if !matches!(result, Err(ThreadleError::JoinSelf(_))) {
            self.unregister(worker);
        }
        result
    }

    /// Stop every worker, then join them all.
    ///
    /// Returns the first failure; the remaining workers are still joined.
    pub fn shutdown(&self) -> Result<()> {
        let workers = self.workers();
        for worker in &workers {
            worker.stop();
        }
        let mut first_error = None;
        for worker in &workers {
            if let Err(error) = self.join_worker(worker) {
                first_error.get_or_insert(error);
            }
        }
        tracing::debug!(workers = workers.len(), "worker registry shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.len())
            .field("live", &self.live.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new("test", BackoffPolicy::responsive())
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_live_workers_never_underflows() {
        let live = LiveWorkers::default();
        live.decrement();
        assert_eq!(live.get(), 0);
        live.increment();
        live.increment();
        live.decrement();
        assert_eq!(live.get(), 1);
    }

    #[test]
    fn test_spawn_and_shutdown() {
        let registry = registry();
        let a = registry.spawn().unwrap();
        let b = registry.spawn().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.live_workers().get(), 2);
        assert_eq!(a.name(), "test-0");
        assert_eq!(b.name(), "test-1");
        assert_eq!(registry.get(b.id()).map(|w| w.id()), Some(b.id()));

        registry.shutdown().unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.live_workers().get(), 0);
    }

    #[test]
    fn test_current_worker_and_queue_inside_task() {
        let registry = Arc::new(registry());
        let queue = Queue::immediate("lookup", 0);
        let worker = registry.spawn_with([queue.clone()]).unwrap();

        let seen = Arc::new(Mutex::new(None));
        {
            let registry = registry.clone();
            let seen = seen.clone();
            queue.submit_once(move || {
                let worker = registry.current_worker().map(|w| w.id());
                let queue = registry.current_queue().map(|q| q.id());
                *seen.lock() = Some((worker, queue));
                Ok(())
            });
        }

        assert!(wait_until(|| seen.lock().is_some()));
        assert_eq!(*seen.lock(), Some((Some(worker.id()), Some(queue.id()))));
        assert!(registry.current_worker().is_none());
        assert!(registry.current_queue().is_none());
        registry.shutdown().unwrap();
    }

    #[test]
    fn test_tasks_queued_before_spawn_see_their_worker() {
        let registry = Arc::new(registry());
        let queue = Queue::immediate("early", 0);
        let registered = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let registry = registry.clone();
            let registered = registered.clone();
            let ran = ran.clone();
            queue.submit_once(move || {
                if registry.current_worker().is_some() {
                    registered.fetch_add(1, Ordering::SeqCst);
                }
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        registry.spawn_with([queue.clone()]).unwrap();
        assert!(wait_until(|| ran.load(Ordering::SeqCst) == 32));
        assert_eq!(registered.load(Ordering::SeqCst), 32);
        registry.shutdown().unwrap();
    }

    #[test]
    fn test_adopt_current_thread_is_idempotent() {
        let registry = registry();
        let first = registry.adopt_current_thread();
        let second = registry.adopt_current_thread();
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.live_workers().get(), 1);
        assert_eq!(registry.current_worker().map(|w| w.id()), Some(first.id()));

        let queue = Queue::sequential("main", 0);
        first.attach(queue.clone());
        queue.submit_once(|| Ok(()));
        assert_eq!(first.run_pending(8), 1);

        registry.shutdown().unwrap();
        assert!(registry.current_worker().is_none());
        assert_eq!(registry.live_workers().get(), 0);
    }

    #[test]
    fn test_join_queue() {
        let registry = registry();
        let served = Queue::immediate("served", 0);
        let orphan = Queue::immediate("orphan", 0);
        registry.spawn().unwrap();
        registry.spawn().unwrap();
        registry.spawn().unwrap();

        assert_eq!(registry.attach_all(&served), 3);
        assert_eq!(registry.attach_all(&served), 0);
        assert_eq!(registry.workers_for(served.id()).len(), 3);

        assert!(matches!(
            registry.join_queue(orphan.id()),
            Err(ThreadleError::NotAttached(id)) if id == orphan.id()
        ));

        registry.join_queue(served.id()).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.join_queue(served.id()),
            Err(ThreadleError::NotAttached(_))
        ));
    }
}
