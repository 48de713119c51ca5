//! Shared error type for projection processing and storage.

use thiserror::Error;

/// Error type for projection operations.
///
/// Used by the projection store, the checkpoint store, and projection
/// handlers. The runner treats every variant the same way (count the
/// attempt, retry with backoff); the taxonomy exists so logs and tests
/// can tell storage problems apart from event-shaped problems.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Storage backend error (store timeout, connection loss, etc.)
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Checkpoint load/save error
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Event processing error inside a handler
    #[error("event processing error: {0}")]
    EventProcessing(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
