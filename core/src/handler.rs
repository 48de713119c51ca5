//! Projection handler contract.
//!
//! A handler maps delivered events onto one read model. The runner
//! invokes it for every envelope matching the subscription's stream
//! pattern, with these rules:
//!
//! - **Idempotent**: handling the same event twice against the same
//!   prior state must yield the same resulting state (at-least-once
//!   delivery makes duplicates routine, not exceptional).
//! - **Entity-not-found is success**: an update for an entity this read
//!   model has not seen (or has already removed) is logged at warning
//!   level and acknowledged — never an error.
//! - **Deterministic**: new state derives only from the event payload
//!   and its metadata; no external calls, no wall-clock values in
//!   business fields.
//! - **Unknown kinds**: a `type` outside [`DomainEvent`] takes one
//!   explicit log-and-ignore branch.
//!
//! Returning `Err` signals the runner to retry with backoff and, once
//! attempts are exhausted, to apply the subscription's configured
//! failure disposition.
//!
//! [`DomainEvent`]: crate::event::DomainEvent

use std::future::Future;
use std::pin::Pin;

use crate::envelope::EventEnvelope;
use crate::error::Result;

/// An idempotent consumer of delivered events.
///
/// # Dyn Compatibility
///
/// Uses an explicit `Pin<Box<dyn Future>>` return so the runner and
/// orchestrator can hold handlers as `Arc<dyn EventHandler>`.
pub trait EventHandler: Send + Sync {
    /// Stable name, used in logs and subscription status.
    fn name(&self) -> &str;

    /// Apply one delivered event to the read model.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] on a failure the runner should
    /// retry. Entity-not-found and unknown event kinds are *not*
    /// failures; implementations log and return `Ok(())`.
    ///
    /// [`ProjectionError`]: crate::error::ProjectionError
    fn handle<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
