/*!
 * Error Types
 * Centralized error handling with thiserror
 *
 * Every error here is local, synchronous, and recoverable: it is returned
 * to the immediate caller and is never fatal to the runtime.
 */

use thiserror::Error;

/// Errors returned by `join` and `try_join`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// The target fiber was detached; its result will never be delivered.
    #[error("fiber is detached and cannot be joined")]
    AlreadyDetached,

    /// Another fiber already claimed the join. For `try_join` this also
    /// covers the target not yet waiting to be joined.
    #[error("fiber is already being joined")]
    AlreadyJoining,
}

/// Errors returned by `detach`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachError {
    /// The fiber was already detached, or its result was already
    /// collected by a completed join.
    #[error("fiber is already detached")]
    AlreadyDetached,
}

/// Errors surfaced while creating a fiber
///
/// Creation never yields a partial control block: on error the caller
/// holds no handle at all.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("requested stack of {requested} bytes is below the {minimum} byte minimum")]
    StackTooSmall { requested: usize, minimum: usize },

    #[error("failed to allocate fiber execution resources")]
    AllocationFailed(#[source] std::io::Error),
}
