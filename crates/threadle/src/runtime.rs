//! Runtime entry point
//!
//! A [`Runtime`] owns the worker registry, the default queue and the clock
//! every queue it creates runs on. Subsystems get their queues and locks from
//! it instead of from process-wide state.

use crate::config::RuntimeConfig;
use crate::scheduler::{Clock, PolicyKind, Queue, SystemClock, Worker, WorkerRegistry};
use crate::sync::{DeferredLock, HookedLock};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scheduling runtime: workers, queues and lock factories
pub struct Runtime {
    /// Settings the runtime was built with
    config: RuntimeConfig,

    /// Clock shared by all queues created here
    clock: Arc<dyn Clock>,

    /// All workers
    registry: Arc<WorkerRegistry>,

    /// Immediate queue every worker services
    default_queue: Arc<Queue>,

    /// Whether `start` has run
    started: AtomicBool,
}

impl Runtime {
    /// Create a runtime on the system clock. No threads are spawned until
    /// [`start`](Self::start).
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a runtime whose queues use `clock`
    pub fn with_clock(config: RuntimeConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let default_queue = Queue::with_clock(
            config.default_queue_name.clone(),
            config.default_queue_priority,
            PolicyKind::Immediate,
            clock.clone(),
        )?;
        let registry = Arc::new(WorkerRegistry::new(
            config.thread_name_prefix.clone(),
            config.backoff,
        ));
        Ok(Self {
            config,
            clock,
            registry,
            default_queue,
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the configured number of workers. Calling it again does nothing.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let count = self.config.resolved_worker_count();
        for _ in 0..count {
            self.spawn_worker()?;
        }
        tracing::info!(workers = count, "runtime started");
        Ok(())
    }

    /// Spawn one more worker servicing the default queue
    pub fn spawn_worker(&self) -> Result<Arc<Worker>> {
        self.registry.spawn_with([self.default_queue.clone()])
    }

    /// Register the calling thread as a worker servicing the default queue.
    /// Drive it with [`Worker::run_pending`].
    pub fn adopt_current_thread(&self) -> Arc<Worker> {
        let worker = self.registry.adopt_current_thread();
        worker.attach(self.default_queue.clone());
        worker
    }

    /// Create a queue on the runtime's clock
    pub fn queue(
        &self,
        name: impl Into<String>,
        priority: i32,
        kind: PolicyKind,
    ) -> Result<Arc<Queue>> {
        Queue::with_clock(name, priority, kind, self.clock.clone())
    }

    /// Create a Sequential queue on the runtime's clock
    pub fn sequential_queue(&self, name: impl Into<String>, priority: i32) -> Arc<Queue> {
        Queue::sequential_with_clock(name, priority, self.clock.clone())
    }

    /// Create an Immediate queue on the runtime's clock
    pub fn immediate_queue(&self, name: impl Into<String>, priority: i32) -> Arc<Queue> {
        Queue::immediate_with_clock(name, priority, self.clock.clone())
    }

    /// Create a Periodic queue on the runtime's clock
    pub fn periodic_queue(
        &self,
        name: impl Into<String>,
        priority: i32,
        tick: Duration,
    ) -> Result<Arc<Queue>> {
        self.queue(name, priority, PolicyKind::Periodic { tick })
    }

    /// Attach `queue` to every current worker; returns how many took it
    pub fn attach(&self, queue: &Arc<Queue>) -> usize {
        self.registry.attach_all(queue)
    }

    /// Deferred lock scheduling callbacks on the default queue
    pub fn deferred_lock(&self) -> Arc<DeferredLock> {
        Arc::new(DeferredLock::new(self.default_queue.clone()))
    }

    /// Hooked lock scheduling callbacks on the default queue
    pub fn hooked_lock(&self) -> HookedLock {
        HookedLock::new(self.default_queue.clone(), self.registry.live_workers())
    }

    /// Worker registry
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Default Immediate queue
    pub fn default_queue(&self) -> &Arc<Queue> {
        &self.default_queue
    }

    /// Clock shared by the runtime's queues
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Settings the runtime was built with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Whether `start` has run and `shutdown` has not
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Join every worker and discard what is left in the default queue
    pub fn shutdown(&self) -> Result<()> {
        self.started.store(false, Ordering::Release);
        let result = self.registry.shutdown();
        let discarded = self.default_queue.dispose();
        tracing::info!(discarded, "runtime shut down");
        result
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            if let Err(error) = self.shutdown() {
                tracing::warn!(%error, "runtime shutdown on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("default_queue", &self.default_queue.name())
            .finish()
    }
}
