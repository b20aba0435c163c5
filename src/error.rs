use thiserror::Error;

/// Error categories surfaced by the storage core.
///
/// These mirror the outer scheduler's contract: `InvalidArgument` and
/// `Storage` are raised synchronously and never retried internally,
/// `LockTimeout` is the "someone else has it" signal the watchers treat
/// as a no-op, `JobLoad` is carried inside [`crate::job::JobData`] rather
/// than thrown so a bad invocation blob doesn't interrupt the fetch loop,
/// and `Cancelled` is returned whenever a caller's cancellation token
/// fires.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A required argument was null, empty, or out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable description of what was invalid.
        message: String,
    },

    /// A Redis transport or protocol error.
    #[error("storage error: {0}")]
    Storage(#[from] redis::RedisError),

    /// A distributed lock could not be acquired before its deadline.
    #[error("timed out acquiring lock on {resource}")]
    LockTimeout {
        /// The prefixed resource name the lock was requested for.
        resource: String,
    },

    /// The invocation blob for a job could not be deserialized.
    #[error("failed to load job: {message}")]
    JobLoad {
        /// Description of the deserialization failure.
        message: String,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        StorageError::InvalidArgument {
            message: message.into(),
        }
    }
}
