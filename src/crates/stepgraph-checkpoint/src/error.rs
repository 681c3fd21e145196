//! Error types for checkpoint store operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised by a [`CheckpointStore`](crate::CheckpointStore) or a serializer.
///
/// Every variant is an I/O-class fault from the caller's point of view: the stored
/// session is left as it was and the operation can be retried.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary envelope encoding or decoding failed
    #[error("Binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Backend refused or lost the operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Checkpoint or session id failed validation
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
