/*!
 * Lock-Contention Advisor
 *
 * A process-wide advisory token recording whether the runtime's lock is
 * currently held and by whom. It is a scheduling hint, not a lock: there
 * is no queueing and no fairness guarantee, concurrent writers simply
 * overwrite each other, and the scheduler treats the answer as advice.
 *
 * Held as an explicit, injectable context object (never a hidden
 * global) so tests can run independent instances side by side.
 */

use crate::fiber::{Fiber, FiberHandle};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::{Arc, Weak};

/// Advisory lock-usage states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum LockUse {
    /// No lock has been registered with the advisor yet
    Unregistered = -1,
    /// A lock is registered and currently free
    Free = 0,
    /// The lock is held by the recorded fiber
    Held = 1,
}

impl LockUse {
    fn from_i8(value: i8) -> Self {
        match value {
            -1 => LockUse::Unregistered,
            0 => LockUse::Free,
            1 => LockUse::Held,
            _ => unreachable!("invalid lock-use value {value}"),
        }
    }
}

/// Process-wide lock-ownership advisory
pub struct LockAdvisor {
    using: AtomicI8,
    /// Valid only while `using == Held`; weak so the advisor never keeps
    /// a finished fiber alive
    holder: Mutex<Option<Weak<Fiber>>>,
}

impl LockAdvisor {
    pub fn new() -> Self {
        Self {
            using: AtomicI8::new(LockUse::Unregistered as i8),
            holder: Mutex::new(None),
        }
    }

    /// Register a lock with the advisor.
    ///
    /// Idempotent: of any number of concurrent callers the first moves
    /// the token from `Unregistered` to `Free` and the rest are no-ops.
    /// Returns whether this call did the registration.
    pub fn register_lock(&self) -> bool {
        self.using
            .compare_exchange(
                LockUse::Unregistered as i8,
                LockUse::Free as i8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Record that `holder` now holds the lock.
    ///
    /// Unconditional last-writer-wins publish; racing holders simply
    /// overwrite each other.
    pub fn mark_held(&self, holder: &FiberHandle) {
        *self.holder.lock() = Some(Arc::downgrade(holder));
        self.using.store(LockUse::Held as i8, Ordering::Release);
    }

    /// Record that `holder` released the lock.
    ///
    /// Takes effect only if `holder` matches the recorded holder; a
    /// stale or misordered release is silently ignored. Returns whether
    /// the release was applied.
    pub fn mark_released(&self, holder: &FiberHandle) -> bool {
        let mut recorded = self.holder.lock();
        let matches = recorded
            .as_ref()
            .is_some_and(|weak| Weak::ptr_eq(weak, &Arc::downgrade(holder)));

        if matches {
            *recorded = None;
            self.using.store(LockUse::Free as i8, Ordering::Release);
            true
        } else {
            debug!(
                "ignoring lock release from fiber {} which is not the recorded holder",
                holder.id()
            );
            false
        }
    }

    /// Current advisory state; a plain atomic read.
    #[inline]
    pub fn status(&self) -> LockUse {
        LockUse::from_i8(self.using.load(Ordering::Acquire))
    }

    /// The fiber recorded as holding the lock, if it is still alive and
    /// the token reads `Held`.
    pub fn holder(&self) -> Option<FiberHandle> {
        if self.status() != LockUse::Held {
            return None;
        }
        self.holder.lock().as_ref().and_then(Weak::upgrade)
    }
}

impl Default for LockAdvisor {
    fn default() -> Self {
        Self::new()
    }
}
