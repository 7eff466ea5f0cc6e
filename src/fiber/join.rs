/*!
 * Join/Detach Coordination
 *
 * The completion/join/detach state machine. The `detach_state` word is
 * the single total order over these events for a given fiber: every
 * transition is an atomic read-modify-write, and whichever call observes
 * a given prior value is solely responsible for the corresponding wake.
 * That gives exactly-one-wake semantics with no lock, no lost result,
 * and no duplicate delivery under full concurrency.
 *
 * Once a join has claimed the handoff the state is sealed to `Detached`,
 * so late join or detach calls fail cleanly instead of waiting on a
 * rendezvous that will never happen.
 */

use super::{DetachState, Fiber, FiberHandle, FiberResult, FiberState};
use crate::core::errors::{DetachError, JoinError};
use crate::sched::SchedulerFacade;
use log::trace;
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl Fiber {
    /// Record `this` fiber's result and perform the join handoff.
    ///
    /// Called exactly once, by the fiber itself, when its run body
    /// returns. If a joiner is already parked the result is delivered to
    /// it and it is rescheduled; otherwise the fiber parks itself until a
    /// joiner (or a detach) wakes it. A detached fiber skips the handoff
    /// entirely and its result is dropped with the control block.
    pub fn complete<S: SchedulerFacade>(this: &FiberHandle, result: FiberResult, sched: &S) {
        *this.result.lock() = Some(result);

        let mut current = this.detach_state.load(Ordering::Acquire);
        loop {
            let observed = DetachState::from_u8(current);
            let claimed = match observed {
                // Detached: no one will ever collect the result.
                DetachState::Detached => break,
                // Finished first: park until a joiner arrives.
                DetachState::None => DetachState::WaitForJoiner,
                // A joiner is parked (or parking): deliver to it.
                DetachState::WaitToJoin => DetachState::Detached,
                DetachState::WaitForJoiner => {
                    debug_assert!(false, "fiber {} completed twice", this.id);
                    break;
                }
            };

            match this.detach_state.compare_exchange_weak(
                current,
                claimed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if observed == DetachState::None {
                        trace!("fiber {} finished first, parking for joiner", this.id);
                        sched.set_and_wait(&this.join_info, Arc::clone(this));
                    } else {
                        let joiner = sched.clear_or_wait(&this.join_info);
                        trace!("fiber {} delivering result to fiber {}", this.id, joiner.id);
                        *joiner.result.lock() = this.result.lock().take();
                        joiner.set_state(FiberState::Ready);
                        sched.schedule(joiner);
                    }
                    break;
                }
                Err(actual) => current = actual,
            }
        }

        this.set_state(FiberState::Done);
    }

    /// Wait for this fiber to complete and collect its result.
    ///
    /// `current` is the calling fiber's own control block; when the
    /// target has not finished yet the caller parks inside it until the
    /// finisher delivers the result there.
    ///
    /// Returns `Ok(None)` only when a concurrent `detach` won the race
    /// and woke this (now stale) joiner as a convenience.
    pub fn join<S: SchedulerFacade>(
        &self,
        current: &FiberHandle,
        sched: &S,
    ) -> Result<Option<FiberResult>, JoinError> {
        debug_assert!(
            !std::ptr::eq(self, Arc::as_ptr(current)),
            "fiber {} attempted to join itself",
            self.id
        );

        let mut state = self.detach_state.load(Ordering::Acquire);
        loop {
            let observed = DetachState::from_u8(state);
            let claimed = match observed {
                DetachState::Detached => return Err(JoinError::AlreadyDetached),
                DetachState::WaitToJoin => return Err(JoinError::AlreadyJoining),
                // Target still running: register as the joiner and park.
                DetachState::None => DetachState::WaitToJoin,
                // Target finished and parked: take the result directly.
                DetachState::WaitForJoiner => DetachState::Detached,
            };

            match self.detach_state.compare_exchange_weak(
                state,
                claimed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let result = if observed == DetachState::None {
                        trace!(
                            "fiber {} joining unfinished fiber {}, parking",
                            current.id,
                            self.id
                        );
                        sched.set_and_wait(&self.join_info, Arc::clone(current));
                        // Woken by the finisher (result delivered into our
                        // own block) or by a detach (nothing delivered).
                        self.detach_state
                            .store(DetachState::Detached as u8, Ordering::Release);
                        current.result.lock().take()
                    } else {
                        let result = self.result.lock().take();
                        let finisher = sched.clear_or_wait(&self.join_info);
                        finisher.set_state(FiberState::Ready);
                        sched.schedule(finisher);
                        result
                    };
                    return Ok(result);
                }
                Err(actual) => state = actual,
            }
        }
    }

    /// Non-blocking join.
    ///
    /// Succeeds only when this fiber has already finished and is parked
    /// waiting for a joiner; claiming it is a single compare-exchange, so
    /// of any number of concurrent callers exactly one wins. Losing the
    /// race (or calling before completion) is an ordinary failure with no
    /// side effect.
    pub fn try_join<S: SchedulerFacade>(
        &self,
        sched: &S,
    ) -> Result<Option<FiberResult>, JoinError> {
        match self.detach_state.compare_exchange(
            DetachState::WaitForJoiner as u8,
            DetachState::Detached as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let result = self.result.lock().take();
                let finisher = sched.clear_or_wait(&self.join_info);
                finisher.set_state(FiberState::Ready);
                sched.schedule(finisher);
                Ok(result)
            }
            Err(actual) => Err(match DetachState::from_u8(actual) {
                DetachState::Detached => JoinError::AlreadyDetached,
                _ => JoinError::AlreadyJoining,
            }),
        }
    }

    /// Abandon this fiber's result.
    ///
    /// A party already parked in the handoff (the finisher, or a stale
    /// joiner) is woken and rescheduled; the stale joiner's `join`
    /// returns `Ok(None)`. Detaching twice, or detaching after a join
    /// collected the result, fails with no side effect.
    pub fn detach<S: SchedulerFacade>(&self, sched: &S) -> Result<(), DetachError> {
        let mut state = self.detach_state.load(Ordering::Acquire);
        loop {
            let observed = DetachState::from_u8(state);
            if observed == DetachState::Detached {
                return Err(DetachError::AlreadyDetached);
            }

            match self.detach_state.compare_exchange_weak(
                state,
                DetachState::Detached as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if matches!(
                        observed,
                        DetachState::WaitForJoiner | DetachState::WaitToJoin
                    ) {
                        let parked = sched.clear_or_wait(&self.join_info);
                        trace!(
                            "detach of fiber {} waking parked fiber {}",
                            self.id,
                            parked.id
                        );
                        parked.set_state(FiberState::Ready);
                        sched.schedule(parked);
                    }
                    return Ok(());
                }
                Err(actual) => state = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::FiberConfig;
    use crate::sched::ThreadedScheduler;
    use std::time::Duration;

    fn wait_for(predicate: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(std::time::Instant::now() < deadline, "timed out");
            std::thread::yield_now();
        }
    }

    #[test]
    fn test_finish_first_then_join() {
        let sched = ThreadedScheduler::new();
        let main = Fiber::adopt_thread();

        let fiber = sched
            .spawn(FiberConfig::default(), || Box::new(17u32) as FiberResult)
            .unwrap();
        wait_for(|| fiber.detach_state() == DetachState::WaitForJoiner);

        let result = fiber.join(&main, &*sched).unwrap().unwrap();
        assert_eq!(*result.downcast::<u32>().unwrap(), 17);
    }

    #[test]
    fn test_completion_of_detached_fiber_skips_handoff() {
        let sched = ThreadedScheduler::new();
        let fiber = Fiber::new(FiberConfig::default()).unwrap();

        fiber.detach(&*sched).unwrap();
        Fiber::complete(&fiber, Box::new(0u8), &*sched);

        assert_eq!(fiber.state(), FiberState::Done);
        assert_eq!(fiber.detach_state(), DetachState::Detached);
        // The result stays with the control block and dies with it
        assert!(fiber.result.lock().is_some());
    }

    #[test]
    fn test_join_after_join_fails() {
        let sched = ThreadedScheduler::new();
        let main = Fiber::adopt_thread();

        let fiber = sched
            .spawn(FiberConfig::default(), || Box::new(5i64) as FiberResult)
            .unwrap();
        wait_for(|| fiber.detach_state() == DetachState::WaitForJoiner);

        assert!(fiber.join(&main, &*sched).is_ok());
        assert_eq!(
            fiber.join(&main, &*sched).unwrap_err(),
            JoinError::AlreadyDetached
        );
    }

    #[test]
    fn test_detach_after_join_fails() {
        let sched = ThreadedScheduler::new();
        let main = Fiber::adopt_thread();

        let fiber = sched
            .spawn(FiberConfig::default(), || Box::new(5i64) as FiberResult)
            .unwrap();
        wait_for(|| fiber.detach_state() == DetachState::WaitForJoiner);
        fiber.join(&main, &*sched).unwrap();

        assert_eq!(
            fiber.detach(&*sched).unwrap_err(),
            DetachError::AlreadyDetached
        );
    }

    #[test]
    fn test_try_join_before_completion_fails() {
        let sched = ThreadedScheduler::new();
        let fiber = Fiber::new(FiberConfig::default()).unwrap();

        assert_eq!(
            fiber.try_join(&*sched).unwrap_err(),
            JoinError::AlreadyJoining
        );
        assert_eq!(fiber.detach_state(), DetachState::None);
    }
}
