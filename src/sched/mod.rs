/*!
 * Scheduler Boundary
 *
 * The primitives this core consumes from the surrounding scheduler
 * (`SchedulerFacade`), the lock-contention advisory state it maintains
 * for that scheduler, and a thread-backed reference facade used by the
 * test suite and benchmarks.
 */

mod advisor;
mod threaded;
mod traits;

pub use advisor::{LockAdvisor, LockUse};
pub use threaded::ThreadedScheduler;
pub use traits::SchedulerFacade;
