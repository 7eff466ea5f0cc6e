/*!
 * Thread-Backed Reference Facade
 *
 * Implements the scheduler facade by giving every fiber its own OS
 * thread: parking a fiber parks its thread, scheduling it unparks the
 * thread. This is the facade the test suite and benchmarks run the
 * synchronization core against; a production N:M scheduler replaces it
 * wholesale.
 */

use super::traits::SchedulerFacade;
use crate::core::errors::SpawnError;
use crate::core::sync::Mailbox;
use crate::fiber::{Fiber, FiberConfig, FiberHandle, FiberResult, FiberState};
use crossbeam_queue::SegQueue;
use log::trace;
use parking_lot_core::{park, unpark_one, ParkToken, UnparkToken};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Stable parking address for a fiber: its control block
#[inline]
fn park_key(fiber: &FiberHandle) -> usize {
    Arc::as_ptr(fiber) as usize
}

thread_local! {
    /// The fiber currently executing on this thread
    static CURRENT: std::cell::RefCell<Option<FiberHandle>> =
        const { std::cell::RefCell::new(None) };
}

/// Reference facade backing each fiber with a dedicated thread
pub struct ThreadedScheduler {
    /// Fibers whose run body has returned, awaiting release during
    /// maintenance
    finished: SegQueue<FiberHandle>,
    spawned: AtomicU64,
    released: AtomicU64,
}

impl ThreadedScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            finished: SegQueue::new(),
            spawned: AtomicU64::new(0),
            released: AtomicU64::new(0),
        })
    }

    /// Start a fiber running `body` on its own thread.
    ///
    /// The requested stack size is validated by the control block and
    /// applied to the backing thread. The entry mirrors a fiber
    /// trampoline: maintenance first (we are resuming from a new place),
    /// then the body, then completion and deferred release.
    pub fn spawn<F>(self: &Arc<Self>, config: FiberConfig, body: F) -> Result<FiberHandle, SpawnError>
    where
        F: FnOnce() -> FiberResult + Send + 'static,
    {
        let fiber = Fiber::new(config)?;
        let handle = Arc::clone(&fiber);
        let sched = Arc::clone(self);

        thread::Builder::new()
            .name(format!("fiber-{}", fiber.id()))
            .stack_size(fiber.stack_size())
            .spawn(move || {
                CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(&handle)));
                sched.do_maintenance();
                handle.set_state(FiberState::Running);

                let result = body();
                Fiber::complete(&handle, result, &*sched);

                CURRENT.with(|current| current.borrow_mut().take());
                sched.release(handle);
            })
            .map_err(SpawnError::AllocationFailed)?;

        self.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(fiber)
    }

    /// Queue a finished fiber for release at the next maintenance pass.
    pub fn release(&self, fiber: FiberHandle) {
        trace!("fiber {} queued for release", fiber.id());
        self.finished.push(fiber);
    }

    /// The fiber executing on the calling thread, if any.
    pub fn current() -> Option<FiberHandle> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Create a control block for the calling thread and make it the
    /// thread's current fiber, letting non-fiber threads participate in
    /// joins.
    pub fn adopt_thread() -> FiberHandle {
        let fiber = Fiber::adopt_thread();
        CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(&fiber)));
        fiber
    }

    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl SchedulerFacade for ThreadedScheduler {
    fn schedule(&self, fiber: FiberHandle) {
        // The fiber may not have parked yet; set_and_wait re-validates
        // its state under the bucket lock, so an early unpark is safe.
        unsafe {
            unpark_one(park_key(&fiber), |_| UnparkToken(0));
        }
    }

    fn yield_now(&self, _current: &FiberHandle) {
        thread::yield_now();
    }

    fn set_and_wait(&self, slot: &Mailbox, current: FiberHandle) {
        // Publish our identity, then park until schedule() marks us
        // Ready. The peer may complete the whole handoff between the
        // publish and the park, so the state transition is a CAS and the
        // park validates against Ready under the bucket lock.
        current.set_state(FiberState::SavingStateToWait);
        slot.publish(Arc::clone(&current));
        current.transition_state(FiberState::SavingStateToWait, FiberState::Waiting);

        let key = park_key(&current);
        while current.state() != FiberState::Ready {
            unsafe {
                park(
                    key,
                    || current.state() != FiberState::Ready,
                    || {},
                    |_, _| {},
                    ParkToken(0),
                    None,
                );
            }
        }

        current.set_state(FiberState::Running);
        self.do_maintenance();
    }

    fn clear_or_wait(&self, slot: &Mailbox) -> FiberHandle {
        slot.take_or_wait()
    }

    fn do_maintenance(&self) {
        while let Some(fiber) = self.finished.pop() {
            trace!("releasing fiber {}", fiber.id());
            self.released.fetch_add(1, Ordering::Relaxed);
            drop(fiber);
        }
    }
}
