use thiserror::Error;

use crate::constants::MAX_MESSAGE_LEN;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Status check error: {0}")]
    Status(#[from] StatusError),

    #[error("Feed error: {0}")]
    Feed(String),
}

/// Local, synchronous input validation failures.  Never reach the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message body is empty")]
    EmptyBody,

    #[error("Message body is {len} UTF-16 units, maximum is {max}")]
    BodyTooLong { len: usize, max: usize },
}

impl ValidationError {
    pub fn too_long(len: usize) -> Self {
        Self::BodyTooLong {
            len,
            max: MAX_MESSAGE_LEN,
        }
    }
}

/// The mutate or query capability rejected the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("Rate limited")]
    RateLimited,

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Record not found")]
    NotFound,

    #[error("Backend error: {0}")]
    Backend(String),
}

/// The status-check capability failed or timed out.  Non-fatal for the
/// liveness watcher; polling continues on the next tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("Status request failed: {0}")]
    Request(String),

    #[error("Status request timed out")]
    Timeout,
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SyncError>;
