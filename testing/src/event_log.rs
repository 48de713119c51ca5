//! In-memory event log for fast, deterministic testing.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use storefront_core::envelope::{EventEnvelope, EventMetadata, StreamPattern};
use storefront_core::event::DomainEvent;
use storefront_core::event_log::{EventLog, EventLogError, EventLogStream};

/// Capacity of the live-tail channel; tests never come close.
const LIVE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Inner {
    history: Vec<EventEnvelope>,
    revisions: HashMap<String, u64>,
}

/// In-memory [`EventLog`] honoring the real delivery contract.
///
/// A subscription replays history past its starting position, then
/// tails live appends, with no gap between the two phases. Appends are
/// assigned a global sequence (1-based) and a per-stream revision
/// (1-based) exactly like the production log.
///
/// Cloning shares the log, so a test can hold one clone for appending
/// while the runner under test holds another.
#[derive(Clone, Debug)]
pub struct InMemoryEventLog {
    inner: Arc<Mutex<Inner>>,
    live: broadcast::Sender<EventEnvelope>,
}

impl InMemoryEventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                history: Vec::new(),
                revisions: HashMap::new(),
            })),
            live,
        }
    }

    /// Append a domain event to a stream, returning the envelope as
    /// delivered to subscribers.
    pub fn append(&self, stream_id: &str, event: &DomainEvent) -> EventEnvelope {
        let mut inner = self.inner.lock().unwrap();

        let revision = {
            let revision = inner.revisions.entry(stream_id.to_string()).or_insert(0);
            *revision += 1;
            *revision
        };
        let envelope = EventEnvelope {
            event_type: event.event_type().to_string(),
            data: event.to_payload().unwrap(),
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                stream_id: stream_id.to_string(),
                revision,
                event_sequence: inner.history.len() as u64 + 1,
                occurred_at: Utc::now(),
                correlation_id: None,
                causation_id: None,
            },
        };

        inner.history.push(envelope.clone());
        // No receivers is fine: nothing is tailing yet
        let _ = self.live.send(envelope.clone());
        envelope
    }

    /// Append a raw envelope verbatim, bypassing sequence assignment.
    ///
    /// For tests that need malformed payloads or unknown event types.
    pub fn append_raw(&self, envelope: EventEnvelope) {
        self.inner.lock().unwrap().history.push(envelope.clone());
        let _ = self.live.send(envelope);
    }

    /// Number of events appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }

    /// Whether the log holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for InMemoryEventLog {
    fn subscribe(
        &self,
        pattern: &StreamPattern,
        from_sequence: u64,
    ) -> Pin<Box<dyn Future<Output = Result<EventLogStream, EventLogError>> + Send + '_>> {
        let pattern = pattern.clone();
        Box::pin(async move {
            // Subscribe to the live channel while holding the history
            // lock, so no append lands between snapshot and tail.
            let (snapshot, mut live) = {
                let inner = self.inner.lock().unwrap();
                (inner.history.clone(), self.live.subscribe())
            };

            let stream: EventLogStream = Box::pin(stream! {
                let mut last_emitted = from_sequence;
                for envelope in snapshot {
                    if envelope.sequence() > last_emitted && pattern.matches(envelope.stream_id()) {
                        last_emitted = envelope.sequence();
                        yield Ok(envelope);
                    }
                }
                loop {
                    match live.recv().await {
                        Ok(envelope) => {
                            // Replayed history overlaps the tail; the
                            // sequence guard deduplicates it.
                            if envelope.sequence() > last_emitted
                                && pattern.matches(envelope.stream_id())
                            {
                                last_emitted = envelope.sequence();
                                yield Ok(envelope);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            yield Err(EventLogError::Transport(format!(
                                "subscriber lagged, {missed} events dropped"
                            )));
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(stream)
        })
    }
}
