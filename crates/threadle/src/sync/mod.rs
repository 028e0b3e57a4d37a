//! Locks for protecting resources shared between queues
//!
//! Everything here is built on [`TicketLock`], a fair spinlock. The deferred
//! variants let a caller hand over a callback instead of blocking a worker
//! thread while the lock is owned elsewhere.

mod deferred;
mod guarded;
mod hooked;
mod rwlock;
mod ticket;

pub use deferred::DeferredLock;
pub use guarded::{Guarded, GuardedRef};
pub use hooked::HookedLock;
pub use rwlock::{Access, ReadWriteLock, SyncError};
pub use ticket::{TicketGuard, TicketLock};
