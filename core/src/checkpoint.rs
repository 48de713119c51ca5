//! Durable subscription checkpoints.
//!
//! A checkpoint marks how far a consumer group has progressed through
//! the event log. The runner owns checkpoints: it persists one every
//! `progress_every` acknowledgements (not per event, to bound write
//! amplification) and resumes at-or-before the persisted position after
//! a crash — duplicates past the checkpoint are acceptable, gaps are
//! not.
//!
//! Implementations must never move a position backward; a save with a
//! position at or below the stored one is a silent no-op.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::StreamPattern;
use crate::error::Result;

/// Durable progress marker for one (stream pattern, consumer group).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCheckpoint {
    /// Stream pattern the consumer group subscribes to
    pub stream_pattern: String,

    /// Consumer group name
    pub group: String,

    /// Last event sequence known to be fully processed
    pub position: u64,

    /// When this position was persisted
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionCheckpoint {
    /// Create a checkpoint at the given position, stamped now.
    #[must_use]
    pub fn new(pattern: &StreamPattern, group: impl Into<String>, position: u64) -> Self {
        Self {
            stream_pattern: pattern.as_str().to_string(),
            group: group.into(),
            position,
            updated_at: Utc::now(),
        }
    }
}

/// Storage backend for subscription checkpoints.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn CheckpointStore>`), which the
/// runner requires.
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a consumer group, if one exists.
    ///
    /// `None` means the group is new and should start from the
    /// beginning of the log.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the load fails.
    ///
    /// [`ProjectionError::Checkpoint`]: crate::error::ProjectionError::Checkpoint
    fn load(
        &self,
        stream_pattern: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubscriptionCheckpoint>>> + Send + '_>>;

    /// Persist a checkpoint.
    ///
    /// Saving a position at or below the currently stored one must
    /// leave the stored checkpoint unchanged — checkpoints only ever
    /// advance.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the save fails.
    ///
    /// [`ProjectionError::Checkpoint`]: crate::error::ProjectionError::Checkpoint
    fn save(
        &self,
        checkpoint: SubscriptionCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Destroy the checkpoint for a consumer group.
    ///
    /// This is the explicit reset operation used when rebuilding a read
    /// model from scratch; ordinary restarts never call it.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the delete fails.
    ///
    /// [`ProjectionError::Checkpoint`]: crate::error::ProjectionError::Checkpoint
    fn reset(
        &self,
        stream_pattern: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
