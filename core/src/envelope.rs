//! Event envelope: the immutable unit of delivery.
//!
//! An [`EventEnvelope`] pairs a domain fact (`type` + `data`) with the
//! routing and ordering metadata the projection engine needs. The wire
//! field names (`type`, `eventId`, `streamId`, `revision`,
//! `eventSequence`, `occurredAt`, `correlationId`, `causationId`) are a
//! compatibility contract for downstream tooling and must be preserved
//! exactly — the serde renames in this module are load-bearing.
//!
//! Envelopes are produced once by the write side and consumed
//! arbitrarily many times; nothing in this workspace ever mutates one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised at the envelope deserialization boundary.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The envelope's `type` is not a known event kind.
    ///
    /// Handlers treat this as log-and-ignore, not as a failure: a newer
    /// producer may emit kinds this consumer does not know yet.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The envelope's `data` does not match the schema for its `type`.
    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload {
        /// The event kind whose schema was violated
        event_type: String,
        /// Serde's description of the mismatch
        reason: String,
    },
}

/// Routing and ordering metadata attached to every event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Globally unique id of this event
    pub event_id: Uuid,

    /// Stream (entity) this event belongs to, e.g. `product-42`
    pub stream_id: String,

    /// Position within the stream; starts at 1 and increases by 1 per event
    pub revision: u64,

    /// Global, monotonically increasing position across all streams
    pub event_sequence: u64,

    /// When the write side recorded the fact
    pub occurred_at: DateTime<Utc>,

    /// Links related events across streams
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Links cause-and-effect events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

/// Envelope for a single event as delivered by the event log.
///
/// `data` is carried as raw JSON here; it is validated exactly once, at
/// the deserialization boundary, by [`EventEnvelope::decode`] — handlers
/// never inspect untyped payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event kind identifier, e.g. `ProductCreated.v1`
    #[serde(rename = "type")]
    pub event_type: String,

    /// Raw event payload; schema depends on `type`
    pub data: serde_json::Value,

    /// Routing and ordering metadata
    pub metadata: EventMetadata,
}

impl EventEnvelope {
    /// Stream id shorthand.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.metadata.stream_id
    }

    /// Global sequence shorthand.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.metadata.event_sequence
    }
}

/// A pattern selecting the streams a subscription consumes.
///
/// Two forms are supported, matching what the event log's
/// competing-consumer subscriptions offer:
///
/// - exact: `product-42` matches only that stream
/// - prefix: `product-*` matches every stream starting with `product-`
///
/// # Example
///
/// ```
/// use storefront_core::envelope::StreamPattern;
///
/// let pattern = StreamPattern::new("product-*");
/// assert!(pattern.matches("product-42"));
/// assert!(!pattern.matches("order-42"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamPattern {
    raw: String,
}

impl StreamPattern {
    /// Create a pattern from its string form.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self { raw: pattern.into() }
    }

    /// Whether the given stream id is selected by this pattern.
    #[must_use]
    pub fn matches(&self, stream_id: &str) -> bool {
        match self.raw.strip_suffix('*') {
            Some(prefix) => stream_id.starts_with(prefix),
            None => stream_id == self.raw,
        }
    }

    /// The pattern's string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for StreamPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for StreamPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}
