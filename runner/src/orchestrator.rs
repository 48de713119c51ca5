//! Subscription orchestrator: registration, lifecycle, status.
//!
//! The orchestrator owns an explicit registry of subscription bindings.
//! Each registered binding can be started, stopped, inspected, and
//! restarted by name; restarting resumes from the group's durable
//! checkpoint, it never re-reads the whole log.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use storefront_core::{CheckpointStore, EventLog, ProjectionError, Result};

use crate::runner::{
    SubscriptionBinding, SubscriptionOptions, SubscriptionRunner, SubscriptionState,
};

/// Point-in-time view of one subscription, for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// Subscription name
    pub name: String,
    /// Stream pattern consumed
    pub stream_pattern: String,
    /// Consumer group
    pub group: String,
    /// Handler name
    pub handler: String,
    /// Current lifecycle state
    pub state: SubscriptionState,
}

/// Result of an operator-initiated restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartOutcome {
    /// Whether the subscription is running again
    pub success: bool,
    /// Human-readable account of what happened
    pub message: String,
}

struct SubscriptionEntry {
    binding: SubscriptionBinding,
    options: SubscriptionOptions,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SubscriptionState>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionEntry {
    fn state(&self) -> SubscriptionState {
        *self.state_rx.borrow()
    }

    /// A spawned task counts as running even before it publishes
    /// `Starting`; a faulted task has already finished.
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Manages the set of subscriptions of one engine process.
///
/// # Example
///
/// ```ignore
/// let orchestrator = SubscriptionOrchestrator::new(event_log, checkpoints);
/// orchestrator.register(binding, SubscriptionOptions::default()).await;
/// orchestrator.start_all().await?;
///
/// for status in orchestrator.status().await {
///     println!("{}: {}", status.name, status.state);
/// }
/// ```
pub struct SubscriptionOrchestrator {
    runner: SubscriptionRunner,
    subscriptions: Mutex<HashMap<String, SubscriptionEntry>>,
}

impl SubscriptionOrchestrator {
    /// Create an orchestrator over an event log and a checkpoint store.
    #[must_use]
    pub fn new(event_log: Arc<dyn EventLog>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            runner: SubscriptionRunner::new(event_log, checkpoints),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscription without starting it.
    ///
    /// Re-registering a name replaces the previous binding; if the old
    /// subscription is running it is left running and a warning is
    /// logged — stop it first for a clean swap.
    pub async fn register(&self, binding: SubscriptionBinding, options: SubscriptionOptions) {
        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(existing) = subscriptions.get(&binding.name) {
            tracing::warn!(
                subscription = %binding.name,
                state = %existing.state(),
                "Replacing existing subscription registration"
            );
        }
        let (shutdown_tx, _) = watch::channel(false);
        let (_, state_rx) = watch::channel(SubscriptionState::Stopped);
        subscriptions.insert(
            binding.name.clone(),
            SubscriptionEntry {
                binding,
                options,
                shutdown_tx,
                state_rx,
                task: None,
            },
        );
    }

    /// Start a registered subscription.
    ///
    /// Returns `false` (with a warning) if it is already running; this
    /// is a no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::EventProcessing`] if no subscription
    /// with that name is registered.
    pub async fn start(&self, name: &str) -> Result<bool> {
        let mut subscriptions = self.subscriptions.lock().await;
        let entry = subscriptions
            .get_mut(name)
            .ok_or_else(|| unknown_subscription(name))?;

        if entry.is_running() {
            tracing::warn!(subscription = name, "Subscription already running, start ignored");
            return Ok(false);
        }

        Self::spawn(&self.runner, entry);
        Ok(true)
    }

    /// Start every registered subscription that is not already running.
    pub async fn start_all(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for entry in subscriptions.values_mut() {
            if !entry.is_running() {
                Self::spawn(&self.runner, entry);
            }
        }
    }

    /// Stop a subscription gracefully, draining in-flight events and
    /// persisting the final checkpoint before returning.
    ///
    /// Returns `false` if it was not running.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::EventProcessing`] if no subscription
    /// with that name is registered.
    pub async fn stop(&self, name: &str) -> Result<bool> {
        let mut subscriptions = self.subscriptions.lock().await;
        let entry = subscriptions
            .get_mut(name)
            .ok_or_else(|| unknown_subscription(name))?;
        Ok(Self::shut_down(entry).await)
    }

    /// Stop every running subscription, draining each in turn.
    pub async fn stop_all(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for entry in subscriptions.values_mut() {
            Self::shut_down(entry).await;
        }
    }

    /// Restart a subscription by name.
    ///
    /// A running subscription is stopped first (draining in-flight
    /// events); a faulted or stopped one starts directly. Either way
    /// delivery resumes from the durable checkpoint.
    pub async fn restart(&self, name: &str) -> RestartOutcome {
        let mut subscriptions = self.subscriptions.lock().await;
        let Some(entry) = subscriptions.get_mut(name) else {
            return RestartOutcome {
                success: false,
                message: format!("no subscription named {name}"),
            };
        };

        let was = entry.state();
        Self::shut_down(entry).await;
        Self::spawn(&self.runner, entry);

        RestartOutcome {
            success: true,
            message: format!("subscription {name} restarted from checkpoint (was {was})"),
        }
    }

    /// Status of every registered subscription, sorted by name.
    pub async fn status(&self) -> Vec<SubscriptionStatus> {
        let subscriptions = self.subscriptions.lock().await;
        let mut statuses: Vec<SubscriptionStatus> = subscriptions
            .values()
            .map(|entry| SubscriptionStatus {
                name: entry.binding.name.clone(),
                stream_pattern: entry.binding.pattern.as_str().to_string(),
                group: entry.binding.group.clone(),
                handler: entry.binding.handler.name().to_string(),
                state: entry.state(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Status of one subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::EventProcessing`] if no subscription
    /// with that name is registered.
    pub async fn subscription_status(&self, name: &str) -> Result<SubscriptionStatus> {
        let subscriptions = self.subscriptions.lock().await;
        let entry = subscriptions
            .get(name)
            .ok_or_else(|| unknown_subscription(name))?;
        Ok(SubscriptionStatus {
            name: entry.binding.name.clone(),
            stream_pattern: entry.binding.pattern.as_str().to_string(),
            group: entry.binding.group.clone(),
            handler: entry.binding.handler.name().to_string(),
            state: entry.state(),
        })
    }

    fn spawn(runner: &SubscriptionRunner, entry: &mut SubscriptionEntry) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Stopped);
        let state_tx = Arc::new(state_tx);

        let runner = runner.clone();
        let binding = entry.binding.clone();
        let options = entry.options.clone();
        let name = binding.name.clone();
        let task = tokio::spawn(async move {
            if let Err(error) = runner.run(binding, options, state_tx, shutdown_rx).await {
                tracing::error!(
                    subscription = %name,
                    error = %error,
                    "Subscription terminated"
                );
            }
        });

        entry.shutdown_tx = shutdown_tx;
        entry.state_rx = state_rx;
        entry.task = Some(task);
    }

    /// Signal shutdown and wait for the delivery loop to finish.
    /// Returns whether anything was actually running.
    async fn shut_down(entry: &mut SubscriptionEntry) -> bool {
        let was_running = entry.is_running();
        let _ = entry.shutdown_tx.send(true);
        if let Some(task) = entry.task.take() {
            if let Err(error) = task.await {
                tracing::error!(
                    subscription = %entry.binding.name,
                    error = %error,
                    "Subscription task panicked"
                );
            }
        }
        was_running
    }
}

fn unknown_subscription(name: &str) -> ProjectionError {
    ProjectionError::EventProcessing(format!("no subscription named {name}"))
}
