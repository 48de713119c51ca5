//! End-to-end tests for the subscription runner and orchestrator,
//! running against the in-memory event log and checkpoint store.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::panic)] // Test assertions panic

use std::collections::HashMap;
use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing_subscriber::fmt::MakeWriter;

use storefront_core::envelope::{EventEnvelope, StreamPattern};
use storefront_core::event::{DomainEvent, ProductCreated, ProductPriceChanged};
use storefront_core::{
    CheckpointStore, EventHandler, ProjectionError, Result, SubscriptionCheckpoint,
};
use storefront_runner::{
    ExhaustionPolicy, RetryPolicy, SubscriptionBinding, SubscriptionOptions,
    SubscriptionOrchestrator, SubscriptionRunner, SubscriptionState,
};
use storefront_testing::{init_test_tracing, InMemoryCheckpointStore, InMemoryEventLog};

/// Handler that records what it sees and fails or stalls on demand.
struct RecordingHandler {
    name: String,
    seen: Arc<Mutex<Vec<EventEnvelope>>>,
    /// Remaining induced failures per event sequence
    failures: Arc<Mutex<HashMap<u64, usize>>>,
    /// Remaining long stalls per event sequence (to trip the runner's
    /// message timeout)
    stalls: Arc<Mutex<HashMap<u64, usize>>>,
    delay: Duration,
}

impl RecordingHandler {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            stalls: Arc::new(Mutex::new(HashMap::new())),
            delay: Duration::ZERO,
        }
    }

    fn failing(self, sequence: u64, times: usize) -> Self {
        self.failures.lock().unwrap().insert(sequence, times);
        self
    }

    fn stalling(self, sequence: u64, times: usize) -> Self {
        self.stalls.lock().unwrap().insert(sequence, times);
        self
    }

    const fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn seen_sequences(&self) -> Vec<u64> {
        self.seen.lock().unwrap().iter().map(EventEnvelope::sequence).collect()
    }

    fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let stalled = {
                let mut stalls = self.stalls.lock().unwrap();
                match stalls.get_mut(&envelope.sequence()) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if stalled {
                // Far past any message timeout these tests configure;
                // the runner's deadline cancels this sleep.
                sleep(Duration::from_secs(30)).await;
            }
            if self.delay > Duration::ZERO {
                sleep(self.delay).await;
            }
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(&envelope.sequence()) {
                    if *remaining > 0 {
                        *remaining = remaining.saturating_sub(1);
                        return Err(ProjectionError::EventProcessing(
                            "induced failure".to_string(),
                        ));
                    }
                }
            }
            self.seen.lock().unwrap().push(envelope.clone());
            Ok(())
        })
    }
}

fn created(id: &str) -> DomainEvent {
    DomainEvent::ProductCreated(ProductCreated {
        product_id: id.to_string(),
        name: "Kettle".to_string(),
        category: "kitchen".to_string(),
        price_cents: 2500,
    })
}

fn price_changed(id: &str, price_cents: i64) -> DomainEvent {
    DomainEvent::ProductPriceChanged(ProductPriceChanged {
        product_id: id.to_string(),
        price_cents,
    })
}

/// Fast backoff so retry tests stay quick.
fn fast_options() -> SubscriptionOptions {
    SubscriptionOptions::default()
        .with_progress_every(1)
        .with_backoff(
            RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(5))
                .max_delay(Duration::from_millis(20))
                .build(),
        )
}

async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {description}");
}

async fn wait_for_state(
    orchestrator: &SubscriptionOrchestrator,
    name: &str,
    expected: SubscriptionState,
) {
    for _ in 0..500 {
        if orchestrator.subscription_status(name).await.unwrap().state == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {name} to reach {expected}");
}

/// Collects formatted log output so tests can assert on its contents.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self {
        self.clone()
    }
}

fn binding(name: &str, pattern: &str, handler: &Arc<RecordingHandler>) -> SubscriptionBinding {
    SubscriptionBinding::new(
        name,
        StreamPattern::new(pattern),
        name,
        Arc::clone(handler) as Arc<dyn EventHandler>,
    )
}

#[tokio::test]
async fn delivers_history_then_live_events() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    log.append("product-1", &created("p-1"));
    log.append("product-2", &created("p-2"));

    let handler = Arc::new(RecordingHandler::new("catalog-product-view"));
    let orchestrator =
        SubscriptionOrchestrator::new(Arc::new(log.clone()), Arc::new(checkpoints));
    orchestrator
        .register(binding("catalog-product-view", "product-*", &handler), fast_options())
        .await;
    orchestrator.start_all().await;

    let h = Arc::clone(&handler);
    wait_until("history replay", move || h.seen_count() == 2).await;

    log.append("product-1", &price_changed("p-1", 2000));
    let h = Arc::clone(&handler);
    wait_until("live delivery", move || h.seen_count() == 3).await;

    assert_eq!(handler.seen_sequences(), vec![1, 2, 3]);
    orchestrator.stop_all().await;
}

#[tokio::test]
async fn restart_resumes_from_checkpoint_without_reprocessing() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    for i in 1..=3 {
        log.append(&format!("product-{i}"), &created(&format!("p-{i}")));
    }

    let handler = Arc::new(RecordingHandler::new("catalog-product-view"));
    let orchestrator = SubscriptionOrchestrator::new(
        Arc::new(log.clone()),
        Arc::new(checkpoints.clone()),
    );
    orchestrator
        .register(binding("catalog-product-view", "product-*", &handler), fast_options())
        .await;
    orchestrator.start("catalog-product-view").await.unwrap();

    let h = Arc::clone(&handler);
    wait_until("first pass", move || h.seen_count() == 3).await;
    assert!(orchestrator.stop("catalog-product-view").await.unwrap());
    assert_eq!(checkpoints.position("product-*", "catalog-product-view"), Some(3));

    // New events land while the subscription is down
    log.append("product-4", &created("p-4"));
    log.append("product-5", &created("p-5"));

    orchestrator.start("catalog-product-view").await.unwrap();
    let h = Arc::clone(&handler);
    wait_until("resumed delivery", move || h.seen_count() == 5).await;

    // Nothing before the checkpoint was redelivered
    assert_eq!(handler.seen_sequences(), vec![1, 2, 3, 4, 5]);
    orchestrator.stop_all().await;
}

#[tokio::test]
async fn resumes_at_a_checkpoint_behind_the_acks() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    for i in 1..=10 {
        log.append(&format!("product-{i}"), &created(&format!("p-{i}")));
    }
    // A crash left the checkpoint behind the work actually done:
    // events 6 and 7 were applied but never made it into a checkpoint.
    checkpoints
        .save(SubscriptionCheckpoint::new(
            &StreamPattern::new("product-*"),
            "catalog-product-view",
            5,
        ))
        .await
        .unwrap();

    let handler = Arc::new(RecordingHandler::new("catalog-product-view"));
    let orchestrator =
        SubscriptionOrchestrator::new(Arc::new(log.clone()), Arc::new(checkpoints));
    orchestrator
        .register(binding("catalog-product-view", "product-*", &handler), fast_options())
        .await;
    orchestrator.start_all().await;

    let h = Arc::clone(&handler);
    wait_until("redelivery past the checkpoint", move || h.seen_count() == 5).await;

    // Duplicates of 6-7 are fine (handlers are idempotent); gaps are not.
    assert_eq!(handler.seen_sequences(), vec![6, 7, 8, 9, 10]);
    orchestrator.stop_all().await;
}

#[tokio::test]
async fn transient_failure_retries_then_recovers() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    log.append("product-1", &created("p-1"));

    // Fails twice, succeeds on the third attempt (within max_retries=3)
    let handler = Arc::new(RecordingHandler::new("catalog-product-view").failing(1, 2));
    let orchestrator =
        SubscriptionOrchestrator::new(Arc::new(log.clone()), Arc::new(checkpoints.clone()));
    orchestrator
        .register(binding("catalog-product-view", "product-*", &handler), fast_options())
        .await;
    orchestrator.start("catalog-product-view").await.unwrap();

    let h = Arc::clone(&handler);
    wait_until("retry recovery", move || h.seen_count() == 1).await;

    let status = orchestrator
        .subscription_status("catalog-product-view")
        .await
        .unwrap();
    assert_eq!(status.state, SubscriptionState::Running);
    assert_eq!(checkpoints.position("product-*", "catalog-product-view"), Some(1));
    orchestrator.stop_all().await;
}

#[tokio::test]
async fn exhausted_retries_skip_and_continue() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    log.append("product-1", &created("p-1"));
    log.append("product-1", &price_changed("p-1", 2000)); // poison
    log.append("product-1", &price_changed("p-1", 1500));

    let handler =
        Arc::new(RecordingHandler::new("catalog-product-view").failing(2, usize::MAX));
    let orchestrator =
        SubscriptionOrchestrator::new(Arc::new(log.clone()), Arc::new(checkpoints.clone()));
    orchestrator
        .register(
            binding("catalog-product-view", "product-*", &handler),
            fast_options().with_on_exhausted(ExhaustionPolicy::SkipAndContinue),
        )
        .await;
    orchestrator.start("catalog-product-view").await.unwrap();

    let h = Arc::clone(&handler);
    wait_until("skip past poison event", move || h.seen_count() == 2).await;

    assert_eq!(handler.seen_sequences(), vec![1, 3]);
    let status = orchestrator
        .subscription_status("catalog-product-view")
        .await
        .unwrap();
    assert_eq!(status.state, SubscriptionState::Running);
    // The skipped event is acknowledged; the checkpoint moves past it
    let c = checkpoints.clone();
    wait_until("checkpoint past poison event", move || {
        c.position("product-*", "catalog-product-view") == Some(3)
    })
    .await;
    orchestrator.stop_all().await;
}

#[tokio::test]
async fn handler_timeout_is_a_failure_not_a_hang() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    log.append("product-1", &created("p-1"));
    log.append("product-1", &price_changed("p-1", 2000));

    // The first event stalls far past the deadline twice, then behaves
    let handler = Arc::new(RecordingHandler::new("catalog-product-view").stalling(1, 2));
    let orchestrator =
        SubscriptionOrchestrator::new(Arc::new(log.clone()), Arc::new(checkpoints.clone()));
    orchestrator
        .register(
            binding("catalog-product-view", "product-*", &handler),
            fast_options().with_message_timeout(Duration::from_millis(30)),
        )
        .await;
    orchestrator.start("catalog-product-view").await.unwrap();

    let h = Arc::clone(&handler);
    wait_until("delivery after timed-out attempts", move || h.seen_count() == 2).await;

    // Timeouts took the retry path; nothing hung and nothing was lost
    assert_eq!(handler.seen_sequences(), vec![1, 2]);
    let status = orchestrator
        .subscription_status("catalog-product-view")
        .await
        .unwrap();
    assert_eq!(status.state, SubscriptionState::Running);
    let c = checkpoints.clone();
    wait_until("checkpoint past both events", move || {
        c.position("product-*", "catalog-product-view") == Some(2)
    })
    .await;
    orchestrator.stop_all().await;
}

#[tokio::test]
async fn poison_disposition_logs_stream_and_event_ids() {
    let capture = LogCapture::default();
    let _guard = tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .finish(),
    );

    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    let poison = log.append("product-1", &created("p-1"));
    log.append("product-1", &price_changed("p-1", 2000));

    let handler =
        Arc::new(RecordingHandler::new("catalog-product-view").failing(1, usize::MAX));
    let orchestrator =
        SubscriptionOrchestrator::new(Arc::new(log.clone()), Arc::new(checkpoints));
    orchestrator
        .register(
            binding("catalog-product-view", "product-*", &handler),
            fast_options().with_on_exhausted(ExhaustionPolicy::SkipAndContinue),
        )
        .await;
    orchestrator.start_all().await;

    let h = Arc::clone(&handler);
    wait_until("skip past poison event", move || h.seen_count() == 1).await;
    orchestrator.stop_all().await;

    // The final-disposition log must carry enough for an operator to
    // replay the event: stream id, event id, and the error.
    let logs = capture.contents();
    assert!(
        logs.contains(&poison.metadata.event_id.to_string()),
        "skip log must cite the event id"
    );
    assert!(logs.contains("product-1"), "skip log must cite the stream id");
    assert!(logs.contains("induced failure"), "skip log must cite the error");
}

#[tokio::test]
async fn spurious_shutdown_notice_never_drops_an_envelope() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    let handler = Arc::new(
        RecordingHandler::new("catalog-product-view").slow(Duration::from_millis(20)),
    );
    let runner =
        SubscriptionRunner::new(Arc::new(log.clone()), Arc::new(checkpoints.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(watch::channel(SubscriptionState::Stopped).0);
    let subscription = binding("catalog-product-view", "product-*", &handler);
    // One slot keeps intake parked on the semaphore while events queue
    let options = fast_options().with_max_in_flight(1);
    let task = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run(subscription, options, state, shutdown_rx).await }
    });

    for i in 1..=4 {
        log.append("product-1", &created(&format!("p-{i}")));
    }
    // Hammer the shutdown channel with notifications that do not
    // actually request shutdown while intake waits for capacity
    for _ in 0..20 {
        let _ = shutdown_tx.send(false);
        sleep(Duration::from_millis(5)).await;
    }

    let h = Arc::clone(&handler);
    wait_until("every envelope delivered", move || h.seen_count() == 4).await;
    assert_eq!(handler.seen_sequences(), vec![1, 2, 3, 4]);

    let _ = shutdown_tx.send(true);
    task.await.unwrap().unwrap();
    assert_eq!(checkpoints.position("product-*", "catalog-product-view"), Some(4));
}

#[tokio::test]
async fn exhausted_retries_halt_and_fault() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    log.append("product-1", &created("p-1"));
    log.append("product-1", &price_changed("p-1", 2000)); // poison
    log.append("product-1", &price_changed("p-1", 1500));

    let handler =
        Arc::new(RecordingHandler::new("catalog-product-view").failing(2, usize::MAX));
    let orchestrator =
        SubscriptionOrchestrator::new(Arc::new(log.clone()), Arc::new(checkpoints.clone()));
    orchestrator
        .register(
            binding("catalog-product-view", "product-*", &handler),
            fast_options().with_on_exhausted(ExhaustionPolicy::Halt),
        )
        .await;
    orchestrator.start("catalog-product-view").await.unwrap();

    wait_for_state(&orchestrator, "catalog-product-view", SubscriptionState::Faulted).await;

    // Nothing past the poison event was applied
    assert_eq!(handler.seen_sequences(), vec![1]);
    // The checkpoint never moved past the unacknowledged event
    assert_eq!(checkpoints.position("product-*", "catalog-product-view"), Some(1));
}

#[tokio::test]
async fn restart_recovers_a_faulted_subscription() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    log.append("product-1", &created("p-1"));
    log.append("product-1", &price_changed("p-1", 2000)); // fails once per run

    // The first run burns the initial attempt plus three retries before
    // halting; the attempt after the restart succeeds.
    let handler = Arc::new(RecordingHandler::new("catalog-product-view").failing(2, 4));
    let orchestrator =
        SubscriptionOrchestrator::new(Arc::new(log.clone()), Arc::new(checkpoints.clone()));
    orchestrator
        .register(
            binding("catalog-product-view", "product-*", &handler),
            fast_options().with_on_exhausted(ExhaustionPolicy::Halt),
        )
        .await;
    orchestrator.start("catalog-product-view").await.unwrap();

    wait_for_state(&orchestrator, "catalog-product-view", SubscriptionState::Faulted).await;

    let outcome = orchestrator.restart("catalog-product-view").await;
    assert!(outcome.success);

    let h = Arc::clone(&handler);
    wait_until("delivery after restart", move || h.seen_count() == 2).await;
    assert_eq!(handler.seen_sequences(), vec![1, 2]);
    orchestrator.stop_all().await;
}

#[tokio::test]
async fn start_when_running_is_a_noop() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let handler = Arc::new(RecordingHandler::new("catalog-product-view"));
    let orchestrator = SubscriptionOrchestrator::new(
        Arc::new(log.clone()),
        Arc::new(InMemoryCheckpointStore::new()),
    );
    orchestrator
        .register(binding("catalog-product-view", "product-*", &handler), fast_options())
        .await;

    assert!(orchestrator.start("catalog-product-view").await.unwrap());
    // Give the task a beat to reach Running
    sleep(Duration::from_millis(50)).await;
    assert!(!orchestrator.start("catalog-product-view").await.unwrap());
    orchestrator.stop_all().await;
}

#[tokio::test]
async fn unknown_subscription_is_an_error() {
    let orchestrator = SubscriptionOrchestrator::new(
        Arc::new(InMemoryEventLog::new()),
        Arc::new(InMemoryCheckpointStore::new()),
    );
    assert!(orchestrator.start("nope").await.is_err());
    assert!(orchestrator.stop("nope").await.is_err());
    let outcome = orchestrator.restart("nope").await;
    assert!(!outcome.success);
}

#[tokio::test]
async fn events_within_a_stream_stay_ordered_across_slow_handling() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let handler = Arc::new(
        RecordingHandler::new("catalog-product-view").slow(Duration::from_millis(5)),
    );
    let orchestrator = SubscriptionOrchestrator::new(
        Arc::new(log.clone()),
        Arc::new(InMemoryCheckpointStore::new()),
    );
    orchestrator
        .register(binding("catalog-product-view", "product-*", &handler), fast_options())
        .await;
    orchestrator.start_all().await;

    // Interleave two streams
    log.append("product-1", &created("p-1"));
    log.append("product-2", &created("p-2"));
    for i in 0..5 {
        log.append("product-1", &price_changed("p-1", 2000 + i));
        log.append("product-2", &price_changed("p-2", 3000 + i));
    }

    let h = Arc::clone(&handler);
    wait_until("all events delivered", move || h.seen_count() == 12).await;

    // Per-stream revision order is strict even with concurrent streams
    let seen = handler.seen.lock().unwrap();
    for stream in ["product-1", "product-2"] {
        let revisions: Vec<u64> = seen
            .iter()
            .filter(|e| e.stream_id() == stream)
            .map(|e| e.metadata.revision)
            .collect();
        assert_eq!(revisions, vec![1, 2, 3, 4, 5, 6], "stream {stream} out of order");
    }
    drop(seen);
    orchestrator.stop_all().await;
}

#[tokio::test]
async fn graceful_stop_drains_in_flight_events() {
    init_test_tracing();
    let log = InMemoryEventLog::new();
    let checkpoints = InMemoryCheckpointStore::new();
    let handler = Arc::new(
        RecordingHandler::new("catalog-product-view").slow(Duration::from_millis(30)),
    );
    let orchestrator =
        SubscriptionOrchestrator::new(Arc::new(log.clone()), Arc::new(checkpoints.clone()));
    orchestrator
        .register(binding("catalog-product-view", "product-*", &handler), fast_options())
        .await;
    orchestrator.start("catalog-product-view").await.unwrap();
    sleep(Duration::from_millis(20)).await;

    log.append("product-1", &created("p-1"));
    // Let the event reach the worker, then stop mid-handling
    sleep(Duration::from_millis(10)).await;
    assert!(orchestrator.stop("catalog-product-view").await.unwrap());

    // The in-flight event finished and its progress was persisted
    assert_eq!(handler.seen_count(), 1);
    assert_eq!(checkpoints.position("product-*", "catalog-product-view"), Some(1));
}
