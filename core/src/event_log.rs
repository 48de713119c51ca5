//! Event log abstraction (external collaborator, interface only).
//!
//! The event log is the append-only, per-stream-ordered source of truth
//! this engine consumes. It lives outside this repository; we define
//! only the subscription contract the runner needs, plus an error
//! taxonomy. An in-memory implementation for tests lives in
//! `storefront-testing`.
//!
//! # Delivery guarantees the runner relies on
//!
//! - **At-least-once**: events may be delivered more than once, and a
//!   subscription resumed from a checkpoint will redeliver everything
//!   after that position.
//! - **Per-stream order**: events for one stream arrive in revision
//!   order. No ordering is guaranteed across streams.
//! - **Resumable**: subscribing with `from_sequence = n` delivers every
//!   matching event with `eventSequence > n`, including events appended
//!   after the subscription was opened (live tail).

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use thiserror::Error;

use crate::envelope::{EventEnvelope, StreamPattern};

/// Errors that can occur while consuming the event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Failed to open a subscription
    #[error("subscription failed for pattern '{pattern}': {reason}")]
    SubscriptionFailed {
        /// The stream pattern that failed
        pattern: String,
        /// The reason for failure
        reason: String,
    },

    /// Transport-level error on an open subscription
    #[error("transport error: {0}")]
    Transport(String),
}

/// Stream of envelopes from a subscription.
pub type EventLogStream =
    Pin<Box<dyn Stream<Item = Result<EventEnvelope, EventLogError>> + Send>>;

/// The append-only domain event log.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so the runner can hold an `Arc<dyn EventLog>`.
pub trait EventLog: Send + Sync {
    /// Subscribe to every stream matching `pattern`, starting after
    /// `from_sequence` (exclusive).
    ///
    /// Pass `from_sequence = 0` to read from the beginning. The
    /// returned stream never ends on its own; it tails live appends.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::SubscriptionFailed`] if the
    /// subscription cannot be opened.
    fn subscribe(
        &self,
        pattern: &StreamPattern,
        from_sequence: u64,
    ) -> Pin<Box<dyn Future<Output = Result<EventLogStream, EventLogError>> + Send + '_>>;
}
