/*!
 * Scheduler Facade
 *
 * The four scheduling primitives the join/detach protocol relies on,
 * plus the periodic maintenance hook. This core only sequences their use
 * against `detach_state`; how fibers are actually multiplexed onto
 * worker threads is the implementor's business.
 */

use crate::core::sync::Mailbox;
use crate::fiber::FiberHandle;

/// Scheduling primitives consumed by the synchronization core
///
/// Implementations must be:
/// - **Thread-safe**: every method may be called from any worker thread
/// - **Wake-exact**: `schedule` after a park must wake that fiber once
pub trait SchedulerFacade: Send + Sync {
    /// Enqueue a fiber already marked `Ready` for future execution.
    fn schedule(&self, fiber: FiberHandle);

    /// Voluntarily relinquish the calling fiber's turn.
    fn yield_now(&self, current: &FiberHandle);

    /// Atomically publish `current` into `slot`, then park the caller
    /// until `schedule` wakes it. The publish must be visible before the
    /// caller can be observed parked.
    fn set_and_wait(&self, slot: &Mailbox, current: FiberHandle);

    /// Take and clear `slot`'s value, parking the caller first if the
    /// producer has not yet published. Never returns empty-handed.
    fn clear_or_wait(&self, slot: &Mailbox) -> FiberHandle;

    /// Periodic housekeeping, invoked whenever a fiber resumes execution.
    fn do_maintenance(&self);
}
