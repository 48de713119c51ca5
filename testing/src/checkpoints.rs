//! In-memory checkpoint tracking for testing subscription resumption.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use storefront_core::{CheckpointStore, Result, SubscriptionCheckpoint};

type Key = (String, String);

/// In-memory [`CheckpointStore`] with the monotonic-save rule.
///
/// Also counts `save` calls so tests can assert the runner batches
/// checkpoint writes instead of persisting per event.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<Key, SubscriptionCheckpoint>>>,
    save_calls: Arc<AtomicUsize>,
}

impl InMemoryCheckpointStore {
    /// Create an empty checkpoint store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position for a consumer group, if one is stored.
    #[must_use]
    pub fn position(&self, stream_pattern: &str, group: &str) -> Option<u64> {
        self.checkpoints
            .read()
            .unwrap()
            .get(&(stream_pattern.to_string(), group.to_string()))
            .map(|c| c.position)
    }

    /// How many times `save` has been called (including no-op saves).
    #[must_use]
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Drop every checkpoint (for test isolation).
    pub fn clear(&self) {
        self.checkpoints.write().unwrap().clear();
        self.save_calls.store(0, Ordering::SeqCst);
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(
        &self,
        stream_pattern: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubscriptionCheckpoint>>> + Send + '_>> {
        let key = (stream_pattern.to_string(), group.to_string());
        Box::pin(async move { Ok(self.checkpoints.read().unwrap().get(&key).cloned()) })
    }

    fn save(
        &self,
        checkpoint: SubscriptionCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            let key = (checkpoint.stream_pattern.clone(), checkpoint.group.clone());
            let mut checkpoints = self.checkpoints.write().unwrap();
            match checkpoints.get(&key) {
                // Positions only ever advance
                Some(existing) if existing.position >= checkpoint.position => {}
                _ => {
                    checkpoints.insert(key, checkpoint);
                }
            }
            Ok(())
        })
    }

    fn reset(
        &self,
        stream_pattern: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = (stream_pattern.to_string(), group.to_string());
        Box::pin(async move {
            self.checkpoints.write().unwrap().remove(&key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::envelope::StreamPattern;

    fn checkpoint(position: u64) -> SubscriptionCheckpoint {
        SubscriptionCheckpoint::new(&StreamPattern::new("product-*"), "catalog", position)
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = InMemoryCheckpointStore::new();
        store.save(checkpoint(7)).await.unwrap();

        let loaded = store.load("product-*", "catalog").await.unwrap().unwrap();
        assert_eq!(loaded.position, 7);
        assert!(store.load("product-*", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_never_moves_backward() {
        let store = InMemoryCheckpointStore::new();
        store.save(checkpoint(10)).await.unwrap();
        store.save(checkpoint(4)).await.unwrap();
        store.save(checkpoint(10)).await.unwrap();

        assert_eq!(store.position("product-*", "catalog"), Some(10));
        assert_eq!(store.save_calls(), 3);
    }

    #[tokio::test]
    async fn reset_removes_the_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        store.save(checkpoint(10)).await.unwrap();
        store.reset("product-*", "catalog").await.unwrap();
        assert!(store.load("product-*", "catalog").await.unwrap().is_none());
    }
}
