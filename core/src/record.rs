//! Versioned projection records.
//!
//! A [`ProjectionRecord`] is one document in a read model, keyed by
//! (projection type, entity id) in the projection store. Its metadata
//! carries the two numbers the engine's correctness rests on:
//!
//! - `version` strictly increases per mutation of a given record;
//!   the store rejects any write whose version does not advance it
//!   (optimistic concurrency — the backstop against stale, duplicated,
//!   or reordered writes).
//! - `eventSequence` records the source event's global position and is
//!   non-decreasing across one entity's history; handlers use it to
//!   short-circuit duplicate deliveries.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::EventEnvelope;
use crate::error::{ProjectionError, Result};

/// Provenance of the event that produced a record's current state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEvent {
    /// Stream the event belongs to
    pub stream_id: String,
    /// Position within that stream
    pub revision: u64,
    /// Globally unique event id
    pub event_id: Uuid,
    /// Versioned kind identifier
    pub event_type: String,
}

impl SourceEvent {
    /// Capture provenance from a delivered envelope.
    #[must_use]
    pub fn of(envelope: &EventEnvelope) -> Self {
        Self {
            stream_id: envelope.metadata.stream_id.clone(),
            revision: envelope.metadata.revision,
            event_id: envelope.metadata.event_id,
            event_type: envelope.event_type.clone(),
        }
    }
}

/// Bookkeeping metadata attached to every projection record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    /// Strictly increasing per (projection type, entity id)
    pub version: u64,
    /// When the record last changed; derived from the event's
    /// `occurredAt` so handler output stays deterministic
    pub last_updated: DateTime<Utc>,
    /// Global sequence of the event that produced this state
    pub event_sequence: u64,
    /// Provenance of that event
    pub source_event: SourceEvent,
}

impl RecordMetadata {
    /// Metadata for a record created by its entity's first lifecycle
    /// event (`version = 1`).
    #[must_use]
    pub fn first(envelope: &EventEnvelope) -> Self {
        Self {
            version: 1,
            last_updated: envelope.metadata.occurred_at,
            event_sequence: envelope.metadata.event_sequence,
            source_event: SourceEvent::of(envelope),
        }
    }

    /// Metadata for the next mutation of an existing record
    /// (`version + 1`). Callers always advance by exactly one; the
    /// store's version check does the rest.
    #[must_use]
    pub fn advance(&self, envelope: &EventEnvelope) -> Self {
        Self {
            version: self.version + 1,
            last_updated: envelope.metadata.occurred_at,
            event_sequence: envelope.metadata.event_sequence,
            source_event: SourceEvent::of(envelope),
        }
    }
}

/// One versioned document in a read model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRecord<T> {
    /// The denormalized read-model state
    pub data: T,
    /// Version/provenance bookkeeping
    pub metadata: RecordMetadata,
}

impl<T> ProjectionRecord<T> {
    /// Pair read-model data with its metadata.
    #[must_use]
    pub const fn new(data: T, metadata: RecordMetadata) -> Self {
        Self { data, metadata }
    }
}

impl<T: Serialize> ProjectionRecord<T> {
    /// Convert typed data to the JSON document the store persists.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if the data cannot be
    /// represented as JSON.
    pub fn into_document(self) -> Result<ProjectionRecord<serde_json::Value>> {
        let data = serde_json::to_value(self.data)
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        Ok(ProjectionRecord {
            data,
            metadata: self.metadata,
        })
    }
}

impl ProjectionRecord<serde_json::Value> {
    /// Convert a stored JSON document back to typed data.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if the document does
    /// not match `T`'s schema.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<ProjectionRecord<T>> {
        let data = serde_json::from_value(self.data)
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        Ok(ProjectionRecord {
            data,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests can unwrap

    use super::*;
    use crate::envelope::EventMetadata;
    use serde_json::json;

    fn envelope(sequence: u64, revision: u64) -> EventEnvelope {
        EventEnvelope {
            event_type: "ProductCreated.v1".to_string(),
            data: json!({}),
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                stream_id: "product-p-1".to_string(),
                revision,
                event_sequence: sequence,
                occurred_at: Utc::now(),
                correlation_id: None,
                causation_id: None,
            },
        }
    }

    #[test]
    fn first_metadata_starts_at_version_one() {
        let env = envelope(10, 1);
        let meta = RecordMetadata::first(&env);
        assert_eq!(meta.version, 1);
        assert_eq!(meta.event_sequence, 10);
        assert_eq!(meta.source_event.event_id, env.metadata.event_id);
    }

    #[test]
    fn advance_increments_version_and_tracks_sequence() {
        let meta = RecordMetadata::first(&envelope(10, 1));
        let next = meta.advance(&envelope(14, 2));
        assert_eq!(next.version, 2);
        assert_eq!(next.event_sequence, 14);
        assert_eq!(next.source_event.revision, 2);
    }

    #[test]
    fn record_metadata_uses_wire_names() {
        let meta = RecordMetadata::first(&envelope(10, 1));
        let value = serde_json::to_value(&meta).unwrap();
        for field in ["version", "lastUpdated", "eventSequence", "sourceEvent"] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        let source = value.get("sourceEvent").unwrap();
        for field in ["streamId", "revision", "eventId", "eventType"] {
            assert!(source.get(field).is_some(), "missing field {field}");
        }
    }
}
