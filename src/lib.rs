/*!
 * Fiber Synchronization Core
 * Join/detach coordination, hazard-pointer reclamation, and
 * lock-contention scheduling hints for a cooperative fiber runtime
 */

pub mod core;
pub mod fiber;
pub mod hazard;
pub mod sched;

// Re-exports
pub use crate::core::errors::{DetachError, JoinError, SpawnError};
pub use crate::core::sync::Mailbox;
pub use fiber::{
    DetachState, Fiber, FiberConfig, FiberHandle, FiberResult, FiberState, LockStats,
    LockStatsSnapshot,
};
pub use hazard::{HazardNode, HazardRegistry, LocalHazards};
pub use sched::{LockAdvisor, LockUse, SchedulerFacade, ThreadedScheduler};
