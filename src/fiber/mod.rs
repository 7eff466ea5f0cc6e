/*!
 * Fiber Control Block
 *
 * One control block per fiber, owned by the runtime until both completion
 * and join/detach have occurred. Aside from the `detach_state` word and
 * the handoff mailbox, every field is single-owner at any given instant:
 * it belongs to whichever fiber currently holds the turn.
 */

use crate::core::errors::SpawnError;
use crate::core::sync::Mailbox;
use crate::core::types::{FiberId, DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
use std::any::Any;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

mod join;
mod lock_stats;

pub use lock_stats::{LockStats, LockStatsSnapshot};

/// Owning handle to a fiber control block
pub type FiberHandle = Arc<Fiber>;

/// Opaque fiber result, written exactly once at completion and taken
/// exactly once by the joiner
pub type FiberResult = Box<dyn Any + Send + 'static>;

/// Execution state of a fiber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    Running = 1,
    Ready = 2,
    Waiting = 3,
    Done = 4,
    /// The window where a parking fiber has published its identity but
    /// its execution state is still being saved. Used by facades that
    /// perform register-level context switches.
    SavingStateToWait = 5,
}

impl FiberState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => FiberState::Running,
            2 => FiberState::Ready,
            3 => FiberState::Waiting,
            4 => FiberState::Done,
            5 => FiberState::SavingStateToWait,
            _ => unreachable!("invalid fiber state {value}"),
        }
    }
}

/// The four-way handshake governing whether a fiber's result will ever
/// be collected
///
/// All transitions happen through atomic read-modify-write on this one
/// word; the previous value observed by the exchange determines which
/// caller is responsible for the corresponding wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DetachState {
    None = 0,
    /// The fiber finished first and parked itself awaiting a joiner.
    WaitForJoiner = 1,
    /// A joiner arrived first and parked itself awaiting completion.
    WaitToJoin = 2,
    Detached = 3,
}

impl DetachState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DetachState::None,
            1 => DetachState::WaitForJoiner,
            2 => DetachState::WaitToJoin,
            3 => DetachState::Detached,
            _ => unreachable!("invalid detach state {value}"),
        }
    }
}

/// Creation parameters for a fiber
#[derive(Debug, Clone, Copy)]
pub struct FiberConfig {
    pub stack_size: usize,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Fiber control block
pub struct Fiber {
    id: FiberId,
    stack_size: usize,
    state: AtomicU8,
    detach_state: AtomicU8,
    /// Owned-once result slot. Exclusivity of access is guaranteed by the
    /// detach_state order, so an uncontended lock suffices here.
    pub(crate) result: parking_lot::Mutex<Option<FiberResult>>,
    /// Rendezvous slot carrying the handle of the other handoff party
    pub(crate) join_info: Mailbox,
    /// Transient cell for internal mechanisms. At most one mechanism may
    /// use it at a time (contract, not enforced).
    scratch: AtomicPtr<()>,
    lock_stats: LockStats,
}

impl Fiber {
    /// Create a control block for a new fiber.
    ///
    /// Fails without allocating a partial block when the requested stack
    /// is below the supported minimum.
    pub fn new(config: FiberConfig) -> Result<FiberHandle, SpawnError> {
        if config.stack_size < MIN_STACK_SIZE {
            return Err(SpawnError::StackTooSmall {
                requested: config.stack_size,
                minimum: MIN_STACK_SIZE,
            });
        }

        Ok(Arc::new(Self::with_state(
            config.stack_size,
            FiberState::Ready,
        )))
    }

    /// Create a control block for the calling OS thread, letting it
    /// participate in joins as a fiber. The thread is already running, so
    /// no stack is allocated or validated.
    pub fn adopt_thread() -> FiberHandle {
        Arc::new(Self::with_state(0, FiberState::Running))
    }

    fn with_state(stack_size: usize, state: FiberState) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            stack_size,
            state: AtomicU8::new(state as u8),
            detach_state: AtomicU8::new(DetachState::None as u8),
            result: parking_lot::Mutex::new(None),
            join_info: Mailbox::new(),
            scratch: AtomicPtr::new(ptr::null_mut()),
            lock_stats: LockStats::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> FiberId {
        self.id
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    #[inline]
    pub fn state(&self) -> FiberState {
        FiberState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Set the execution state. Intended for scheduler facades; the join
    /// protocol itself only stores here at well-defined handoff points.
    #[inline]
    pub fn set_state(&self, state: FiberState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Transition the execution state only if it still holds `from`.
    /// Returns false when another party moved the state first.
    pub fn transition_state(&self, from: FiberState, to: FiberState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn detach_state(&self) -> DetachState {
        DetachState::from_u8(self.detach_state.load(Ordering::Acquire))
    }

    /// Per-fiber lock-contention timing advisories
    #[inline]
    pub fn lock_stats(&self) -> &LockStats {
        &self.lock_stats
    }

    /// Stash a pointer in the scratch cell, returning the previous value.
    /// The cell is reserved for internal mechanisms; two mechanisms must
    /// never use it concurrently.
    pub fn swap_scratch(&self, value: *mut ()) -> *mut () {
        self.scratch.swap(value, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("detach_state", &self.detach_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::SpawnError;

    #[test]
    fn test_new_fiber_defaults() {
        let fiber = Fiber::new(FiberConfig::default()).unwrap();

        assert_eq!(fiber.state(), FiberState::Ready);
        assert_eq!(fiber.detach_state(), DetachState::None);
        assert_eq!(fiber.stack_size(), DEFAULT_STACK_SIZE);
        assert!(fiber.result.lock().is_none());
    }

    #[test]
    fn test_stack_size_validated() {
        let err = Fiber::new(FiberConfig { stack_size: 512 }).unwrap_err();
        assert!(matches!(
            err,
            SpawnError::StackTooSmall {
                requested: 512,
                minimum: MIN_STACK_SIZE
            }
        ));
    }

    #[test]
    fn test_adopted_thread_is_running() {
        let fiber = Fiber::adopt_thread();
        assert_eq!(fiber.state(), FiberState::Running);
    }

    #[test]
    fn test_ids_distinct_across_blocks() {
        let a = Fiber::adopt_thread();
        let b = Fiber::adopt_thread();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_state_transition_cas() {
        let fiber = Fiber::adopt_thread();

        assert!(fiber.transition_state(FiberState::Running, FiberState::Waiting));
        assert!(!fiber.transition_state(FiberState::Running, FiberState::Ready));
        assert_eq!(fiber.state(), FiberState::Waiting);
    }

    #[test]
    fn test_scratch_single_user_exchange() {
        let fiber = Fiber::adopt_thread();
        let mut value = 7usize;

        let prev = fiber.swap_scratch(&mut value as *mut usize as *mut ());
        assert!(prev.is_null());

        let taken = fiber.swap_scratch(std::ptr::null_mut());
        assert_eq!(taken as usize, &mut value as *mut usize as usize);
    }
}
