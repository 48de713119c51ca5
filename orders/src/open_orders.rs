//! The open-orders index.
//!
//! One small record per order that still needs fulfilment attention
//! (placed or paid, not yet shipped or cancelled). Terminal events
//! hard-delete the entry; the full history stays in [`OrderView`].
//!
//! [`OrderView`]: crate::order_view::OrderView

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use storefront_core::envelope::{EnvelopeError, EventEnvelope};
use storefront_core::event::DomainEvent;
use storefront_core::{
    EventHandler, ProjectionError, ProjectionRecord, RecordMetadata, Result,
};
use storefront_store::ProjectionStore;

/// Projection type key for open-order records.
pub const OPEN_ORDERS: &str = "open_orders";

/// One order awaiting fulfilment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    /// Order identifier (the entity id)
    pub order_id: String,
    /// Customer who placed the order
    pub customer_id: String,
    /// Order total in cents
    pub total_cents: i64,
    /// Whether payment has cleared
    pub paid: bool,
}

/// Projects `order-*` events into the open-orders index.
pub struct OpenOrdersHandler {
    store: Arc<dyn ProjectionStore>,
}

impl OpenOrdersHandler {
    /// Create a handler writing to the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    async fn load(&self, order_id: &str) -> Result<Option<ProjectionRecord<OpenOrder>>> {
        self.store
            .get_projection(OPEN_ORDERS, order_id)
            .await?
            .map(ProjectionRecord::into_typed)
            .transpose()
    }

    async fn save(&self, order_id: &str, record: ProjectionRecord<OpenOrder>) -> Result<()> {
        let outcome = self
            .store
            .store_projection(OPEN_ORDERS, order_id, record.into_document()?)
            .await?;
        if !outcome.is_applied() {
            tracing::debug!(order_id, "Open-orders write was stale");
        }
        Ok(())
    }

    async fn remove(&self, order_id: &str) -> Result<()> {
        let removed = self.store.delete_projection(OPEN_ORDERS, order_id).await?;
        if removed {
            tracing::info!(order_id, "Order removed from open-orders index");
        }
        Ok(())
    }

    async fn apply(&self, envelope: &EventEnvelope, event: DomainEvent) -> Result<()> {
        match event {
            DomainEvent::OrderPlaced(placed) => {
                if let Some(existing) = self.load(&placed.order_id).await? {
                    if envelope.sequence() <= existing.metadata.event_sequence {
                        return Ok(());
                    }
                }
                let record = ProjectionRecord::new(
                    OpenOrder {
                        order_id: placed.order_id.clone(),
                        customer_id: placed.customer_id,
                        total_cents: placed.total_cents,
                        paid: false,
                    },
                    RecordMetadata::first(envelope),
                );
                self.save(&placed.order_id, record).await
            }

            DomainEvent::OrderPaid(paid) => {
                let Some(existing) = self.load(&paid.order_id).await? else {
                    // Already shipped or cancelled under a faster sibling
                    tracing::debug!(
                        order_id = %paid.order_id,
                        "Payment for untracked order ignored"
                    );
                    return Ok(());
                };
                if envelope.sequence() <= existing.metadata.event_sequence {
                    return Ok(());
                }
                let mut entry = existing.data;
                entry.paid = true;
                let record = ProjectionRecord::new(entry, existing.metadata.advance(envelope));
                self.save(&paid.order_id, record).await
            }

            DomainEvent::OrderShipped(shipped) => self.remove(&shipped.order_id).await,
            DomainEvent::OrderCancelled(cancelled) => self.remove(&cancelled.order_id).await,

            other => {
                tracing::debug!(
                    event_type = other.event_type(),
                    "Event kind outside this read model ignored"
                );
                Ok(())
            }
        }
    }
}

impl EventHandler for OpenOrdersHandler {
    fn name(&self) -> &str {
        "open-orders"
    }

    fn handle<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match envelope.decode() {
                Ok(event) => self.apply(envelope, event).await,
                Err(EnvelopeError::UnknownEventType(event_type)) => {
                    tracing::warn!(
                        event_type = %event_type,
                        sequence = envelope.sequence(),
                        "Unknown event type ignored"
                    );
                    Ok(())
                }
                Err(error @ EnvelopeError::InvalidPayload { .. }) => {
                    Err(ProjectionError::Serialization(error.to_string()))
                }
            }
        })
    }
}
