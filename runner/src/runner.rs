//! Persistent subscription runner.
//!
//! # Overview
//!
//! The runner drives one consumer group over the event log:
//!
//! 1. Loads the group's checkpoint and subscribes past it
//! 2. Fans envelopes out to one worker task per stream, preserving
//!    revision order within a stream while streams run concurrently;
//!    a worker whose queue drains is retired, so the worker set tracks
//!    streams with in-flight events rather than every stream ever seen
//! 3. Bounds in-flight events with a semaphore (backpressure: the
//!    intake loop stalls instead of buffering without limit)
//! 4. Feeds acknowledgements through an [`AckLedger`] and persists the
//!    contiguous watermark every `progress_every` acks
//! 5. Retries handler failures with backoff; exhaustion applies the
//!    subscription's [`ExhaustionPolicy`]
//!
//! # Delivery guarantees
//!
//! At-least-once: after a crash the subscription resumes at or before
//! the persisted watermark, so handlers see duplicates but never gaps.
//! In-stream order is strict; cross-stream order is not promised.
//!
//! [`AckLedger`]: crate::ledger::AckLedger

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;

use storefront_core::{
    CheckpointStore, EventEnvelope, EventHandler, EventLog, ProjectionError, Result,
    StreamPattern, SubscriptionCheckpoint,
};

use crate::ledger::AckLedger;
use crate::retry::{ExhaustionPolicy, FailureDisposition, RetryPolicy};

/// Lifecycle state of one subscription.
///
/// ```text
/// Stopped → Starting → Running ⇄ Failing
///                         │         │
///                         └────→ Faulted
/// ```
///
/// `Failing` means a handler is in its retry loop; the subscription is
/// still alive and other streams keep flowing. `Faulted` is terminal
/// until an operator restarts the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionState {
    /// Not running
    Stopped,
    /// Loading checkpoint and subscribing
    Starting,
    /// Processing events
    Running,
    /// A handler is retrying; delivery continues elsewhere
    Failing,
    /// Halted on an exhausted failure; requires an explicit restart
    Faulted,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failing => "failing",
            Self::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Tuning knobs for one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    /// Persist the checkpoint after this many watermark advances
    pub progress_every: u64,
    /// Hard deadline for one handler invocation
    pub message_timeout: Duration,
    /// Maximum events dispatched but not yet acknowledged
    pub max_in_flight: usize,
    /// Backoff configuration for handler retries
    pub backoff: RetryPolicy,
    /// What happens to an event once retries run out
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            progress_every: 100,
            message_timeout: Duration::from_secs(30),
            max_in_flight: 64,
            backoff: RetryPolicy::default(),
            on_exhausted: ExhaustionPolicy::default(),
        }
    }
}

impl SubscriptionOptions {
    /// Set the checkpoint persistence interval.
    ///
    /// Lower values tighten resumption at the cost of checkpoint I/O.
    #[must_use]
    pub const fn with_progress_every(mut self, progress_every: u64) -> Self {
        self.progress_every = progress_every;
        self
    }

    /// Set the per-invocation handler deadline.
    #[must_use]
    pub const fn with_message_timeout(mut self, message_timeout: Duration) -> Self {
        self.message_timeout = message_timeout;
        self
    }

    /// Set the in-flight event bound.
    #[must_use]
    pub const fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Set the retry backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the exhaustion policy.
    #[must_use]
    pub const fn with_on_exhausted(mut self, on_exhausted: ExhaustionPolicy) -> Self {
        self.on_exhausted = on_exhausted;
        self
    }
}

/// What one subscription consumes and with what.
///
/// The (pattern, group) pair keys the durable checkpoint; two bindings
/// sharing a pattern but not a group progress independently.
#[derive(Clone)]
pub struct SubscriptionBinding {
    /// Unique name, used for orchestration and logs
    pub name: String,
    /// Streams this subscription consumes
    pub pattern: StreamPattern,
    /// Consumer group for checkpoint tracking
    pub group: String,
    /// Handler every delivered event is applied through
    pub handler: Arc<dyn EventHandler>,
}

impl SubscriptionBinding {
    /// Bind a handler to a stream pattern under a consumer group.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pattern: StreamPattern,
        group: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            group: group.into(),
            handler,
        }
    }
}

impl fmt::Debug for SubscriptionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionBinding")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("group", &self.group)
            .field("handler", &self.handler.name())
            .finish()
    }
}

type WorkItem = (EventEnvelope, OwnedSemaphorePermit);

/// One live stream worker: its input channel plus the number of events
/// dispatched to it and not yet acknowledged.
struct StreamSlot {
    tx: mpsc::UnboundedSender<WorkItem>,
    in_flight: usize,
}

/// Drives subscriptions against an event log and a checkpoint store.
///
/// The runner itself is cheap to clone; each [`run`] call owns one
/// subscription's delivery loop until shutdown or fault.
///
/// [`run`]: SubscriptionRunner::run
#[derive(Clone)]
pub struct SubscriptionRunner {
    event_log: Arc<dyn EventLog>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl SubscriptionRunner {
    /// Create a runner over an event log and a checkpoint store.
    #[must_use]
    pub fn new(event_log: Arc<dyn EventLog>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            event_log,
            checkpoints,
        }
    }

    /// Run one subscription until shutdown or fault.
    ///
    /// Publishes lifecycle transitions through `state`; send `true` on
    /// the paired `shutdown` channel to stop gracefully (in-flight
    /// events drain, pending retry delays are cancelled, the final
    /// watermark is persisted).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the starting
    /// checkpoint cannot be loaded, [`ProjectionError::EventProcessing`]
    /// if the subscription cannot be established or faults.
    #[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
    pub async fn run(
        &self,
        binding: SubscriptionBinding,
        options: SubscriptionOptions,
        state: Arc<watch::Sender<SubscriptionState>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let _ = state.send(SubscriptionState::Starting);
        tracing::info!(
            subscription = %binding.name,
            pattern = %binding.pattern,
            group = %binding.group,
            handler = binding.handler.name(),
            "Starting subscription"
        );

        let checkpoint = self
            .checkpoints
            .load(binding.pattern.as_str(), &binding.group)
            .await?;
        let from_sequence = match checkpoint {
            Some(ref c) => {
                tracing::info!(
                    subscription = %binding.name,
                    position = c.position,
                    "Resuming from checkpoint"
                );
                c.position
            }
            None => {
                tracing::info!(subscription = %binding.name, "Starting from beginning");
                0
            }
        };

        let mut stream = self
            .event_log
            .subscribe(&binding.pattern, from_sequence)
            .await
            .map_err(|e| {
                ProjectionError::EventProcessing(format!(
                    "Failed to subscribe to {}: {e}",
                    binding.pattern
                ))
            })?;

        let semaphore = Arc::new(Semaphore::new(options.max_in_flight));
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<(String, u64)>();
        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel::<String>();
        let mut ledger = AckLedger::new(from_sequence);
        let mut last_persisted = from_sequence;
        let mut workers: HashMap<String, StreamSlot> = HashMap::new();
        let mut tasks = JoinSet::new();

        let _ = state.send(SubscriptionState::Running);

        let fault: Option<String> = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break None;
                    }
                }

                Some(reason) = fault_rx.recv() => {
                    break Some(reason);
                }

                Some((stream, sequence)) = ack_rx.recv() => {
                    Self::retire_idle(&mut workers, &stream);
                    let watermark = ledger.ack(sequence);
                    if watermark >= last_persisted + options.progress_every {
                        self.persist_progress(&binding, watermark).await;
                        last_persisted = watermark;
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(error) = joined {
                        tracing::error!(
                            subscription = %binding.name,
                            error = %error,
                            "Stream worker panicked"
                        );
                    }
                }

                next = stream.next() => match next {
                    Some(Ok(envelope)) => {
                        // Backpressure: block intake until a slot frees.
                        // A shutdown notice that has not flipped to
                        // `true` resumes waiting; the envelope already
                        // pulled from the stream is never dropped.
                        let mut acquired = None;
                        loop {
                            tokio::select! {
                                permit = semaphore.clone().acquire_owned() => {
                                    if let Ok(permit) = permit {
                                        acquired = Some(permit);
                                    }
                                    break;
                                }
                                changed = shutdown.changed() => {
                                    if changed.is_err() || *shutdown.borrow() {
                                        break;
                                    }
                                }
                            }
                        }
                        let Some(permit) = acquired else { break None };
                        Self::dispatch(
                            envelope,
                            permit,
                            &binding,
                            &options,
                            &mut workers,
                            &mut tasks,
                            &ack_tx,
                            &fault_tx,
                            &shutdown,
                            &state,
                        );
                    }
                    Some(Err(error)) => {
                        tracing::warn!(
                            subscription = %binding.name,
                            error = %error,
                            "Event stream error"
                        );
                    }
                    None => {
                        break Some("event stream ended unexpectedly".to_string());
                    }
                }
            }
        };

        // Stop intake and drain in-flight work. Workers finish their
        // current event (retry delays cancel on shutdown) and exit when
        // their channel closes.
        drop(workers);
        while tasks.join_next().await.is_some() {}

        // Collect the acks the drain produced.
        drop(ack_tx);
        while let Some((_, sequence)) = ack_rx.recv().await {
            ledger.ack(sequence);
        }
        let watermark = ledger.watermark();
        if watermark > last_persisted {
            self.persist_progress(&binding, watermark).await;
        }

        if let Some(reason) = fault {
            let _ = state.send(SubscriptionState::Faulted);
            tracing::error!(
                subscription = %binding.name,
                reason = %reason,
                "Subscription faulted"
            );
            return Err(ProjectionError::EventProcessing(reason));
        }

        let _ = state.send(SubscriptionState::Stopped);
        tracing::info!(subscription = %binding.name, position = watermark, "Subscription stopped");
        Ok(())
    }

    /// Route an envelope to its stream's worker, spawning one on first
    /// contact with the stream (or first contact since retirement).
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        envelope: EventEnvelope,
        permit: OwnedSemaphorePermit,
        binding: &SubscriptionBinding,
        options: &SubscriptionOptions,
        workers: &mut HashMap<String, StreamSlot>,
        tasks: &mut JoinSet<()>,
        ack_tx: &mpsc::UnboundedSender<(String, u64)>,
        fault_tx: &mpsc::UnboundedSender<String>,
        shutdown: &watch::Receiver<bool>,
        state: &Arc<watch::Sender<SubscriptionState>>,
    ) {
        let stream_id = envelope.stream_id().to_string();
        let slot = workers.entry(stream_id.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = StreamWorker {
                subscription: binding.name.clone(),
                stream: stream_id,
                handler: Arc::clone(&binding.handler),
                options: options.clone(),
                ack_tx: ack_tx.clone(),
                fault_tx: fault_tx.clone(),
                shutdown: shutdown.clone(),
                state: Arc::clone(state),
            };
            tasks.spawn(worker.run(rx));
            StreamSlot { tx, in_flight: 0 }
        });
        slot.in_flight += 1;

        // A closed channel means the worker halted; the fault signal is
        // already on its way and will end this loop.
        let _ = slot.tx.send((envelope, permit));
    }

    /// Account for one acknowledgement from a stream; a worker whose
    /// queue has fully drained is retired (its channel closes and the
    /// task exits), so long-lived subscriptions over entity-per-stream
    /// patterns do not accumulate one idle worker per entity.
    fn retire_idle(workers: &mut HashMap<String, StreamSlot>, stream: &str) {
        if let Some(slot) = workers.get_mut(stream) {
            slot.in_flight = slot.in_flight.saturating_sub(1);
            if slot.in_flight == 0 {
                workers.remove(stream);
            }
        }
    }

    async fn persist_progress(&self, binding: &SubscriptionBinding, watermark: u64) {
        let checkpoint = SubscriptionCheckpoint::new(&binding.pattern, &binding.group, watermark);
        match self.checkpoints.save(checkpoint).await {
            Ok(()) => {
                tracing::debug!(
                    subscription = %binding.name,
                    position = watermark,
                    "Checkpoint saved"
                );
            }
            // A later save retries; delivery keeps going.
            Err(error) => {
                tracing::warn!(
                    subscription = %binding.name,
                    position = watermark,
                    error = %error,
                    "Failed to save checkpoint"
                );
            }
        }
    }
}

enum Delivery {
    /// The event was applied (or skipped) and should be acknowledged
    Acked,
    /// The subscription must fault
    Halted(String),
    /// Shutdown interrupted a retry; no ack, no fault
    Cancelled,
}

/// Sequential delivery loop for one stream's events.
struct StreamWorker {
    subscription: String,
    stream: String,
    handler: Arc<dyn EventHandler>,
    options: SubscriptionOptions,
    ack_tx: mpsc::UnboundedSender<(String, u64)>,
    fault_tx: mpsc::UnboundedSender<String>,
    shutdown: watch::Receiver<bool>,
    state: Arc<watch::Sender<SubscriptionState>>,
}

impl StreamWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkItem>) {
        while let Some((envelope, permit)) = rx.recv().await {
            let delivery = self.deliver(&envelope).await;
            drop(permit);
            match delivery {
                Delivery::Acked => {
                    let _ = self.ack_tx.send((self.stream.clone(), envelope.sequence()));
                }
                Delivery::Halted(reason) => {
                    let _ = self.fault_tx.send(reason);
                    return;
                }
                Delivery::Cancelled => return,
            }
        }
    }

    /// Apply one event through the retry loop.
    async fn deliver(&mut self, envelope: &EventEnvelope) -> Delivery {
        let mut attempt = 0;
        loop {
            let outcome = timeout(self.options.message_timeout, self.handler.handle(envelope)).await;
            let error = match outcome {
                Ok(Ok(())) => {
                    if attempt > 0 {
                        tracing::info!(
                            subscription = %self.subscription,
                            sequence = envelope.sequence(),
                            attempt,
                            "Handler succeeded after retry"
                        );
                        self.mark_recovered();
                    }
                    return Delivery::Acked;
                }
                Ok(Err(error)) => error.to_string(),
                Err(_) => format!(
                    "handler timed out after {:?}",
                    self.options.message_timeout
                ),
            };

            match self
                .options
                .backoff
                .disposition_for(attempt, self.options.on_exhausted)
            {
                FailureDisposition::Retry(delay) => {
                    self.mark_failing();
                    tracing::warn!(
                        subscription = %self.subscription,
                        handler = self.handler.name(),
                        sequence = envelope.sequence(),
                        stream = envelope.stream_id(),
                        event_id = %envelope.metadata.event_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Handler failed, retrying"
                    );
                    // Shutdown cancels between attempts, never mid-call
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        changed = self.shutdown.changed() => {
                            if changed.is_err() || *self.shutdown.borrow() {
                                return Delivery::Cancelled;
                            }
                        }
                    }
                    attempt += 1;
                }
                FailureDisposition::Skip => {
                    tracing::error!(
                        subscription = %self.subscription,
                        handler = self.handler.name(),
                        sequence = envelope.sequence(),
                        stream = envelope.stream_id(),
                        event_id = %envelope.metadata.event_id,
                        event_type = %envelope.event_type,
                        error = %error,
                        "Retries exhausted, skipping event"
                    );
                    self.mark_recovered();
                    return Delivery::Acked;
                }
                FailureDisposition::Halt => {
                    tracing::error!(
                        subscription = %self.subscription,
                        handler = self.handler.name(),
                        sequence = envelope.sequence(),
                        stream = envelope.stream_id(),
                        event_id = %envelope.metadata.event_id,
                        event_type = %envelope.event_type,
                        error = %error,
                        "Retries exhausted, halting subscription"
                    );
                    return Delivery::Halted(format!(
                        "handler {} failed on event {} ({}): {error}",
                        self.handler.name(),
                        envelope.sequence(),
                        envelope.event_type
                    ));
                }
            }
        }
    }

    fn mark_failing(&self) {
        self.state.send_if_modified(|s| {
            if *s == SubscriptionState::Running {
                *s = SubscriptionState::Failing;
                true
            } else {
                false
            }
        });
    }

    fn mark_recovered(&self) {
        self.state.send_if_modified(|s| {
            if *s == SubscriptionState::Failing {
                *s = SubscriptionState::Running;
                true
            } else {
                false
            }
        });
    }
}
