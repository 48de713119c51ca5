//! # Storefront Core
//!
//! Core types and traits for the Storefront read-model engine.
//!
//! This crate defines the contracts shared by every other crate in the
//! workspace:
//!
//! - **Event envelope**: the immutable unit of delivery pairing a domain
//!   fact with routing/ordering metadata ([`envelope::EventEnvelope`])
//! - **Domain events**: the closed set of event kinds, validated once at
//!   the deserialization boundary ([`event::DomainEvent`])
//! - **Event log**: the external append-only log we consume from
//!   ([`event_log::EventLog`], interface only)
//! - **Checkpoints**: durable subscription progress
//!   ([`checkpoint::CheckpointStore`])
//! - **Projection records**: versioned read-model documents
//!   ([`record::ProjectionRecord`])
//! - **Handlers**: idempotent event consumers invoked by the runner
//!   ([`handler::EventHandler`])
//!
//! ## Delivery model
//!
//! The event log provides **at-least-once** delivery: every event is
//! delivered one or more times, and events for different streams may
//! arrive interleaved in any order. Events for the *same* stream are
//! delivered in revision order. Everything downstream is designed for
//! those semantics: handlers are idempotent, projection writes carry a
//! strictly increasing version, and checkpoints only ever advance.

pub mod checkpoint;
pub mod envelope;
pub mod error;
pub mod event;
pub mod event_log;
pub mod handler;
pub mod record;

pub use checkpoint::{CheckpointStore, SubscriptionCheckpoint};
pub use envelope::{EnvelopeError, EventEnvelope, EventMetadata, StreamPattern};
pub use error::{ProjectionError, Result};
pub use event::DomainEvent;
pub use event_log::{EventLog, EventLogError, EventLogStream};
pub use handler::EventHandler;
pub use record::{ProjectionRecord, RecordMetadata, SourceEvent};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
