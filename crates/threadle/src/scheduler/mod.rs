//! Queues, policies and the workers that drive them
//!
//! Work is submitted to a [`Queue`], whose policy decides when each task may
//! run. [`Worker`] threads poll their attached queues in priority order and
//! execute whatever the first willing queue hands out. The
//! [`WorkerRegistry`] tracks every worker by thread identity.

mod clock;
mod context;
mod policy;
mod queue;
mod registry;
pub(crate) mod task;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::ExecutionContext;
pub use policy::PolicyKind;
pub use queue::{Queue, QueueId, QueueStats};
pub use registry::{LiveWorkers, WorkerRegistry};
pub use task::{Task, TaskError, TaskHandle, TaskId, TaskResult};
pub use worker::{Worker, WorkerId};
