//! # Storefront Runner
//!
//! Persistent subscription runner and orchestrator for the read-model
//! engine. The runner delivers events from the log to idempotent
//! handlers with at-least-once semantics, strict in-stream ordering,
//! bounded concurrency, retry with backoff, and durable checkpoints;
//! the orchestrator manages a named set of such subscriptions.
//!
//! ## Example
//!
//! ```ignore
//! use storefront_runner::{SubscriptionBinding, SubscriptionOptions, SubscriptionOrchestrator};
//!
//! let orchestrator = SubscriptionOrchestrator::new(event_log, checkpoints);
//! orchestrator
//!     .register(
//!         SubscriptionBinding::new(
//!             "catalog-product-view",
//!             StreamPattern::new("product-*"),
//!             "catalog-product-view",
//!             Arc::new(product_view_handler),
//!         ),
//!         SubscriptionOptions::default(),
//!     )
//!     .await;
//! orchestrator.start_all().await;
//! ```

pub mod ledger;
pub mod orchestrator;
pub mod retry;
pub mod runner;

pub use ledger::AckLedger;
pub use orchestrator::{RestartOutcome, SubscriptionOrchestrator, SubscriptionStatus};
pub use retry::{ExhaustionPolicy, FailureDisposition, RetryPolicy};
pub use runner::{
    SubscriptionBinding, SubscriptionOptions, SubscriptionRunner, SubscriptionState,
};
