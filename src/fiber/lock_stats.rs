/*!
 * Per-Fiber Lock Timing Stats
 * Lock-free advisory fields consulted by contention-aware scheduling
 */

use crate::core::types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default run-slice advisory (2 microseconds)
pub const DEFAULT_SLICE_MICROS: u64 = 2;

/// Lock-contention timing advisories for one fiber
///
/// A pure data holder: the owning fiber writes it, the scheduler reads
/// it when deciding whether and how long to run the fiber. Values are
/// microsecond atomics so readers never take a lock.
pub struct LockStats {
    /// Scheduler-clock instant before which the fiber should not be
    /// scheduled; 0 means not banned
    banned_until_micros: AtomicU64,
    /// Advisory cap on the fiber's run quantum
    slice_micros: AtomicU64,
}

/// Point-in-time copy of a fiber's timing advisories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatsSnapshot {
    pub banned_until: Timestamp,
    pub slice_size: Duration,
}

impl LockStats {
    pub fn new() -> Self {
        Self {
            banned_until_micros: AtomicU64::new(0),
            slice_micros: AtomicU64::new(DEFAULT_SLICE_MICROS),
        }
    }

    /// Update either field independently; `None` leaves a field unchanged.
    pub fn set(&self, banned_until: Option<Timestamp>, slice_size: Option<Duration>) {
        if let Some(instant) = banned_until {
            self.banned_until_micros.store(instant, Ordering::Relaxed);
        }
        if let Some(slice) = slice_size {
            self.slice_micros
                .store(slice.as_micros() as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn banned_until(&self) -> Timestamp {
        self.banned_until_micros.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn slice_size(&self) -> Duration {
        Duration::from_micros(self.slice_micros.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            banned_until: self.banned_until(),
            slice_size: self.slice_size(),
        }
    }
}

impl Default for LockStats {
    fn default() -> Self {
        Self::new()
    }
}
