/*!
 * Handoff Mailbox
 *
 * A single-slot, single-use exchange point shared by exactly two
 * cooperating fibers: the finisher and the joiner of a join/detach
 * handoff. One side publishes its identity; the other takes it exactly
 * once. The slot is the only field two fibers ever mutate without full
 * exclusivity, which is why it alone is atomic.
 */

use crate::fiber::{Fiber, FiberHandle};
use parking_lot_core::{park, unpark_one, ParkToken, UnparkToken};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// Single-slot exchange channel for the join handoff
///
/// Exposes only publish and take-and-clear operations; the raw pointer
/// inside never escapes. A taker arriving before the publisher parks on
/// the slot's address (futex-style, no timeout) until a value appears.
pub struct Mailbox {
    slot: AtomicPtr<Fiber>,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            slot: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Stable parking address (same in publish and take)
    #[inline]
    fn park_key(&self) -> usize {
        &self.slot as *const AtomicPtr<Fiber> as usize
    }

    /// Publish a fiber handle into the slot and wake a parked taker.
    ///
    /// The slot must be empty: the protocol allows at most one value per
    /// handoff. Ownership of one handle reference moves into the slot.
    pub fn publish(&self, fiber: FiberHandle) {
        let raw = Arc::into_raw(fiber) as *mut Fiber;
        let prev = self.slot.swap(raw, Ordering::AcqRel);
        debug_assert!(prev.is_null(), "mailbox published twice in one handoff");

        unsafe {
            unpark_one(self.park_key(), |_| UnparkToken(0));
        }
    }

    /// Take and clear the slot, parking until a value is published.
    ///
    /// The validate callback re-checks the slot under the parking bucket
    /// lock, so a publish landing between our swap and the park aborts
    /// the park instead of being missed.
    pub fn take_or_wait(&self) -> FiberHandle {
        loop {
            let raw = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !raw.is_null() {
                return unsafe { Arc::from_raw(raw) };
            }

            unsafe {
                park(
                    self.park_key(),
                    || self.slot.load(Ordering::Relaxed).is_null(),
                    || {},
                    |_, _| {},
                    ParkToken(0),
                    None,
                );
            }
        }
    }

    /// Non-blocking take, used at teardown paths only.
    pub fn try_take(&self) -> Option<FiberHandle> {
        let raw = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
        if raw.is_null() {
            None
        } else {
            Some(unsafe { Arc::from_raw(raw) })
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        // Release a handle that was published but never taken (a fiber
        // leaked by a missing join/detach call).
        let raw = *self.slot.get_mut();
        if !raw.is_null() {
            unsafe { drop(Arc::from_raw(raw)) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::Fiber;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_publish_then_take() {
        let mailbox = Mailbox::new();
        let fiber = Fiber::adopt_thread();

        mailbox.publish(Arc::clone(&fiber));
        let taken = mailbox.take_or_wait();

        assert!(Arc::ptr_eq(&fiber, &taken));
        assert!(mailbox.try_take().is_none());
    }

    #[test]
    fn test_take_blocks_until_published() {
        let mailbox = Arc::new(Mailbox::new());
        let fiber = Fiber::adopt_thread();
        let id = fiber.id();

        let taker = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || mailbox.take_or_wait().id())
        };

        // Give the taker time to park before publishing
        thread::sleep(Duration::from_millis(50));
        mailbox.publish(fiber);

        assert_eq!(taker.join().unwrap(), id);
    }

    #[test]
    fn test_try_take_empty() {
        let mailbox = Mailbox::new();
        assert!(mailbox.try_take().is_none());
    }

    #[test]
    fn test_drop_releases_unclaimed_handle() {
        let fiber = Fiber::adopt_thread();
        {
            let mailbox = Mailbox::new();
            mailbox.publish(Arc::clone(&fiber));
        }
        // The mailbox held one reference; dropping it must give it back
        assert_eq!(Arc::strong_count(&fiber), 1);
    }
}
