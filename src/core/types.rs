/*!
 * Core Types
 * Common types and limits used across the runtime core
 */

/// Fiber ID type
///
/// Unique only within a control block's lifetime; a runtime that recycles
/// control blocks reuses the slot under a fresh ID.
pub type FiberId = u64;

/// Timestamp in microseconds on the scheduler's clock
pub type Timestamp = u64;

/// Default fiber stack size (100 KiB)
pub const DEFAULT_STACK_SIZE: usize = 102_400;

/// Smallest stack a fiber may be created with
pub const MIN_STACK_SIZE: usize = 1024;
