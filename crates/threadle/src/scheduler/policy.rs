//! Scheduling policies
//!
//! A queue owns exactly one [`Policy`], which decides which task (if any) a
//! worker gets from `pull`. All methods run under the owning queue's lock.
//!
//! - [`Immediate`]: any ready task, many in flight at once
//! - [`Sequential`]: one task in flight, round-robin over the list
//! - [`Periodic`]: one task in flight, fixed tick with double-buffered storage

use crate::scheduler::Task;
use crate::{Result, ThreadleError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Public description of a queue's policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Run whichever ready task is available, in any order
    Immediate,
    /// Exactly one task in flight, strict single file
    Sequential,
    /// One task in flight, each task at most once per tick
    Periodic {
        /// Target tick length
        tick: Duration,
    },
}

impl PolicyKind {
    /// Periodic policy from a tick length in seconds
    pub fn periodic_secs(secs: f64) -> Result<Self> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ThreadleError::Configuration(format!(
                "periodic tick must be positive, got {secs}s"
            )));
        }
        Duration::try_from_secs_f64(secs)
            .map(|tick| PolicyKind::Periodic { tick })
            .map_err(|e| ThreadleError::Configuration(format!("periodic tick {secs}s: {e}")))
    }
}

/// Policy state, dispatched by `match`
#[derive(Debug)]
pub(crate) enum Policy {
    Immediate(Immediate),
    Sequential(Sequential),
    Periodic(Periodic),
}

impl Policy {
    pub(crate) fn new(kind: PolicyKind, now: Instant) -> Result<Self> {
        Ok(match kind {
            PolicyKind::Immediate => Self::immediate(now),
            PolicyKind::Sequential => Self::sequential(now),
            PolicyKind::Periodic { tick } => Policy::Periodic(Periodic::new(tick, now)?),
        })
    }

    pub(crate) fn immediate(now: Instant) -> Self {
        Policy::Immediate(Immediate::new(now))
    }

    pub(crate) fn sequential(now: Instant) -> Self {
        Policy::Sequential(Sequential::new(now))
    }

    pub(crate) fn kind(&self) -> PolicyKind {
        match self {
            Policy::Immediate(_) => PolicyKind::Immediate,
            Policy::Sequential(_) => PolicyKind::Sequential,
            Policy::Periodic(p) => PolicyKind::Periodic { tick: p.tick },
        }
    }

    pub(crate) fn submit(&mut self, task: Arc<Task>) {
        match self {
            Policy::Immediate(p) => p.tasks.push(task),
            Policy::Sequential(p) => {
                p.tasks.push(task);
                p.budget += 1;
            }
            Policy::Periodic(p) => p.staging.push_back(task),
        }
    }

    pub(crate) fn pull(&mut self, now: Instant) -> Option<Arc<Task>> {
        match self {
            Policy::Immediate(p) => p.pull(now),
            Policy::Sequential(p) => p.pull(now),
            Policy::Periodic(p) => p.pull(now),
        }
    }

    pub(crate) fn count(&self) -> usize {
        match self {
            Policy::Immediate(p) => p.tasks.len(),
            Policy::Sequential(p) => p.tasks.len(),
            Policy::Periodic(p) => p.active.len() + p.staging.len(),
        }
    }

    pub(crate) fn delta(&self) -> Duration {
        match self {
            Policy::Immediate(p) => p.delta,
            Policy::Sequential(p) => p.delta,
            Policy::Periodic(p) => p.delta,
        }
    }

    pub(crate) fn flips(&self) -> u64 {
        match self {
            Policy::Periodic(p) => p.flips,
            _ => 0,
        }
    }

    /// Drop every queued task without running it. In-flight tasks finish.
    pub(crate) fn drain(&mut self) -> usize {
        match self {
            Policy::Immediate(p) => {
                p.cursor = 0;
                p.tasks.drain(..).count()
            }
            Policy::Sequential(p) => {
                p.cursor = 0;
                p.budget = 0;
                p.tasks.drain(..).count()
            }
            Policy::Periodic(p) => p.active.drain(..).count() + p.staging.drain(..).count(),
        }
    }
}

/// Fire-when-ready storage
#[derive(Debug)]
pub(crate) struct Immediate {
    tasks: Vec<Arc<Task>>,
    /// Scan resumes here so recurring tasks at the front cannot starve the rest
    cursor: usize,
    last_pass: Instant,
    delta: Duration,
}

impl Immediate {
    fn new(now: Instant) -> Self {
        Self {
            tasks: Vec::new(),
            cursor: 0,
            last_pass: now,
            delta: Duration::ZERO,
        }
    }

    fn pull(&mut self, now: Instant) -> Option<Arc<Task>> {
        let mut not_ready = 0usize;
        loop {
            if self.tasks.is_empty() {
                self.cursor = 0;
                return None;
            }
            // Every remaining task was visited and found busy
            if not_ready >= self.tasks.len() {
                return None;
            }
            if self.cursor >= self.tasks.len() {
                self.cursor = 0;
                self.delta = now.saturating_duration_since(self.last_pass);
                self.last_pass = now;
            }

            let task = &self.tasks[self.cursor];
            if task.is_sweepable() {
                self.tasks.remove(self.cursor);
                continue;
            }
            if task.is_runnable() && task.dispatch() {
                if task.is_recurring() {
                    let task = task.clone();
                    self.cursor += 1;
                    return Some(task);
                }
                return Some(self.tasks.remove(self.cursor));
            }
            not_ready += 1;
            self.cursor += 1;
        }
    }
}

/// Single-file storage
#[derive(Debug)]
pub(crate) struct Sequential {
    tasks: Vec<Arc<Task>>,
    /// Task dispatched last; nothing else runs until it is ready again
    current: Option<Arc<Task>>,
    cursor: usize,
    /// Visits left in the current cycle
    budget: usize,
    last_cycle: Instant,
    delta: Duration,
}

impl Sequential {
    fn new(now: Instant) -> Self {
        Self {
            tasks: Vec::new(),
            current: None,
            cursor: 0,
            budget: 0,
            last_cycle: now,
            delta: Duration::ZERO,
        }
    }

    fn pull(&mut self, now: Instant) -> Option<Arc<Task>> {
        if let Some(current) = &self.current {
            if !current.is_ready() {
                return None;
            }
            self.current = None;
        }

        while self.budget > 0 && !self.tasks.is_empty() {
            if self.cursor >= self.tasks.len() {
                self.cursor = 0;
            }
            self.budget -= 1;

            let task = &self.tasks[self.cursor];
            if task.is_sweepable() {
                self.tasks.remove(self.cursor);
                continue;
            }
            if task.is_runnable() && task.dispatch() {
                let task = if task.is_recurring() {
                    let task = task.clone();
                    self.cursor += 1;
                    task
                } else {
                    self.tasks.remove(self.cursor)
                };
                self.current = Some(task.clone());
                return Some(task);
            }
            self.cursor += 1;
        }

        // Cycle exhausted without a ready task
        self.delta = now.saturating_duration_since(self.last_cycle);
        self.last_cycle = now;
        self.budget = self.tasks.len();
        self.cursor = 0;
        None
    }
}

/// Fixed-tick, double-buffered storage
#[derive(Debug)]
pub(crate) struct Periodic {
    tick: Duration,
    /// Tasks taken during the current tick window
    active: VecDeque<Arc<Task>>,
    /// Submissions and re-staged recurring tasks for the next window
    staging: VecDeque<Arc<Task>>,
    current: Option<Arc<Task>>,
    /// Start of the next window; `None` once the clock can no longer advance
    next_tick: Option<Instant>,
    last_flip: Instant,
    delta: Duration,
    flips: u64,
}

impl Periodic {
    fn new(tick: Duration, now: Instant) -> Result<Self> {
        if tick.is_zero() {
            return Err(ThreadleError::Configuration(
                "periodic tick must be positive".to_string(),
            ));
        }
        if now.checked_add(tick).is_none() {
            return Err(ThreadleError::Configuration(format!(
                "periodic tick {tick:?} is out of range"
            )));
        }
        Ok(Self {
            tick,
            active: VecDeque::new(),
            staging: VecDeque::new(),
            current: None,
            next_tick: Some(now),
            last_flip: now,
            delta: Duration::ZERO,
            flips: 0,
        })
    }

    fn pull(&mut self, now: Instant) -> Option<Arc<Task>> {
        if let Some(current) = &self.current {
            if !current.is_ready() {
                return None;
            }
            self.current = None;
        }

        if let Some(deadline) = self.next_tick.filter(|deadline| now >= *deadline) {
            // Windows missed while falling behind are skipped, not replayed
            self.next_tick = deadline
                .checked_add(self.tick)
                .filter(|next| *next > now)
                .or_else(|| now.checked_add(self.tick));
            if self.active.is_empty() {
                std::mem::swap(&mut self.active, &mut self.staging);
                self.flips += 1;
                self.delta = now.saturating_duration_since(self.last_flip);
                self.last_flip = now;
            }
        }

        while let Some(task) = self.active.pop_front() {
            if task.is_remove_requested() {
                continue;
            }
            if !task.is_enabled() {
                self.staging.push_back(task);
                continue;
            }
            if !task.dispatch() {
                self.staging.push_back(task);
                continue;
            }
            if task.is_recurring() {
                self.staging.push_back(task.clone());
            }
            self.current = Some(task.clone());
            return Some(task);
        }
        None
    }
}
