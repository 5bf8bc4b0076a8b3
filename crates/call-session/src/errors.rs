//! Call session error types.
//!
//! Most operations in this crate are fire-and-forget and report nothing to
//! the caller. The errors below cover the few places where a caller is
//! present to receive a result: spawning worker threads, posting to them,
//! and the owner-thread checks on the coordinator.

use thiserror::Error;

/// Call session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A thread-confined operation was invoked from the wrong thread.
    ///
    /// This is a programming error; callers should treat it as fatal.
    #[error("Thread affinity violation: {operation} must run on thread '{expected}'")]
    ThreadAffinity {
        operation: &'static str,
        expected: String,
    },

    /// A worker thread (or its runtime) could not be created.
    #[error("Worker thread spawn failed: {0}")]
    WorkerSpawn(String),

    /// The target worker thread has stopped and no longer accepts tasks.
    #[error("Worker thread unavailable: {0}")]
    WorkerUnavailable(String),

    /// `build` was called on a cell whose instance is already scheduled.
    #[error("Cell already built: {0}")]
    CellAlreadyBuilt(&'static str),

    /// `start` was called more than once on the same session.
    #[error("Session already started")]
    AlreadyStarted,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Returns true for errors that indicate a broken invariant in the
    /// calling code rather than a runtime condition.
    #[must_use]
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            SessionError::ThreadAffinity { .. }
                | SessionError::CellAlreadyBuilt(_)
                | SessionError::AlreadyStarted
        )
    }
}
