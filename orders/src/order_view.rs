//! The full order read model.

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

/// Projection type key for order view records.
pub const ORDER_VIEW: &str = "order_view";

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    /// Placed, awaiting payment
    Placed,
    /// Paid, awaiting shipment
    Paid,
    /// Shipped; terminal
    Shipped,
    /// Cancelled; terminal, record retained
    Cancelled,
}

/// Denormalized order record, one per order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    /// Order identifier (the entity id)
    pub order_id: String,
    /// Customer who placed the order
    pub customer_id: String,
    /// Number of line items
    pub item_count: u32,
    /// Order total in cents
    pub total_cents: i64,
    /// Where the order is in its lifecycle
    pub status: OrderStatus,
    /// Carrier tracking reference, once shipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<String>,
    /// Stated cancellation reason, when one was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_reason: Option<String>,
}

/// Projects `order-*` events into [`OrderView`] records.
pub struct OrderViewHandler {
    store: Arc<dyn ProjectionStore>,
}

impl OrderViewHandler {
    /// Create a handler writing to the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    async fn load(&self, order_id: &str) -> Result<Option<ProjectionRecord<OrderView>>> {
        self.store
            .get_projection(ORDER_VIEW, order_id)
            .await?
            .map(ProjectionRecord::into_typed)
            .transpose()
    }

    async fn save(&self, order_id: &str, record: ProjectionRecord<OrderView>) -> Result<()> {
        let outcome = self
            .store
            .store_projection(ORDER_VIEW, order_id, record.into_document()?)
            .await?;
        if !outcome.is_applied() {
            tracing::debug!(
                order_id,
                stored_version = outcome.record().metadata.version,
                "Order view write was stale"
            );
        }
        Ok(())
    }

    /// Load, duplicate-check, mutate, advance, save. Every update event
    /// follows the same shape; only the mutation differs.
    async fn update(
        &self,
        envelope: &EventEnvelope,
        order_id: &str,
        mutate: impl FnOnce(&mut OrderView),
    ) -> Result<()> {
        let Some(existing) = self.load(order_id).await? else {
            tracing::warn!(
                order_id,
                event_type = %envelope.event_type,
                sequence = envelope.sequence(),
                "Update for unknown order ignored"
            );
            return Ok(());
        };
        if envelope.sequence() <= existing.metadata.event_sequence {
            tracing::debug!(order_id, sequence = envelope.sequence(), "Duplicate ignored");
            return Ok(());
        }
        let mut view = existing.data;
        mutate(&mut view);
        let record = ProjectionRecord::new(view, existing.metadata.advance(envelope));
        self.save(order_id, record).await
    }

    async fn apply(&self, envelope: &EventEnvelope, event: DomainEvent) -> Result<()> {
        match event {
            DomainEvent::OrderPlaced(placed) => {
                if let Some(existing) = self.load(&placed.order_id).await? {
                    if envelope.sequence() <= existing.metadata.event_sequence {
                        return Ok(());
                    }
                }
                let view = OrderView {
                    order_id: placed.order_id.clone(),
                    customer_id: placed.customer_id,
                    item_count: placed.item_count,
                    total_cents: placed.total_cents,
                    status: OrderStatus::Placed,
                    tracking: None,
                    cancelled_reason: None,
                };
                let record = ProjectionRecord::new(view, RecordMetadata::first(envelope));
                self.save(&placed.order_id, record).await
            }

            DomainEvent::OrderPaid(paid) => {
                self.update(envelope, &paid.order_id, |view| {
                    view.status = OrderStatus::Paid;
                })
                .await
            }

            DomainEvent::OrderShipped(shipped) => {
                let tracking = shipped.tracking;
                self.update(envelope, &shipped.order_id, move |view| {
                    view.status = OrderStatus::Shipped;
                    view.tracking = Some(tracking);
                })
                .await
            }

            DomainEvent::OrderCancelled(cancelled) => {
                let reason = cancelled.reason;
                self.update(envelope, &cancelled.order_id, move |view| {
                    view.status = OrderStatus::Cancelled;
                    view.cancelled_reason = reason;
                })
                .await
            }

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

impl EventHandler for OrderViewHandler {
    fn name(&self) -> &str {
        "order-view"
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
