//! # Storefront Testing
//!
//! Testing utilities and in-memory backends for the read-model engine:
//!
//! - [`InMemoryEventLog`]: an append + live-tail event log honoring the
//!   real delivery contract (history replay, then live events)
//! - [`InMemoryCheckpointStore`]: checkpoint tracking with the
//!   monotonic-save rule, plus a save counter for asserting bounded
//!   checkpoint writes
//! - [`init_test_tracing`]: opt-in log output for debugging tests
//!
//! ## Example
//!
//! ```ignore
//! use storefront_testing::{InMemoryEventLog, InMemoryCheckpointStore};
//!
//! #[tokio::test]
//! async fn projection_catches_up() {
//!     let log = InMemoryEventLog::new();
//!     log.append("product-1", &DomainEvent::ProductCreated(created));
//!
//!     let runner = SubscriptionRunner::new(Arc::new(log.clone()), checkpoints);
//!     // ...
//! }
//! ```

pub mod checkpoints;
pub mod event_log;

pub use checkpoints::InMemoryCheckpointStore;
pub use event_log::InMemoryEventLog;

/// Initialize tracing output for a test binary.
///
/// Safe to call from every test; only the first call installs the
/// subscriber. Controlled by `RUST_LOG` as usual.
pub fn init_test_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
