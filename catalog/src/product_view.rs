//! The full product read model.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::envelope::{EnvelopeError, EventEnvelope};
use storefront_core::event::DomainEvent;
use storefront_core::{
    EventHandler, ProjectionError, ProjectionRecord, RecordMetadata, Result,
};
use storefront_store::ProjectionStore;

/// Projection type key for product view records.
pub const PRODUCT_VIEW: &str = "product_view";

/// Lifecycle status of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProductStatus {
    /// Listed and purchasable
    Active,
    /// Soft-marked as withdrawn; record retained for admin surfaces
    Discontinued,
}

/// Denormalized product record, one per product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    /// Product identifier (the entity id)
    pub product_id: String,
    /// Display name
    pub name: String,
    /// Category the product is filed under
    pub category: String,
    /// Current price in cents
    pub price_cents: i64,
    /// Price before the most recent change, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_price_cents: Option<i64>,
    /// When the price last changed, if ever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_updated_at: Option<DateTime<Utc>>,
    /// Active or discontinued
    pub status: ProductStatus,
    /// Stated reason for discontinuation, when one was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discontinued_reason: Option<String>,
}

/// Projects `product-*` events into [`ProductView`] records.
pub struct ProductViewHandler {
    store: Arc<dyn ProjectionStore>,
}

impl ProductViewHandler {
    /// Create a handler writing to the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    async fn load(&self, product_id: &str) -> Result<Option<ProjectionRecord<ProductView>>> {
        self.store
            .get_projection(PRODUCT_VIEW, product_id)
            .await?
            .map(ProjectionRecord::into_typed)
            .transpose()
    }

    async fn save(&self, product_id: &str, record: ProjectionRecord<ProductView>) -> Result<()> {
        let outcome = self
            .store
            .store_projection(PRODUCT_VIEW, product_id, record.into_document()?)
            .await?;
        if !outcome.is_applied() {
            // Another subscription got there first; its write carried
            // the same or a later event.
            tracing::debug!(
                product_id,
                stored_version = outcome.record().metadata.version,
                "Product view write was stale"
            );
        }
        Ok(())
    }

    /// `true` when the stored record already reflects this envelope
    /// (at-least-once redelivery).
    fn is_duplicate(existing: &RecordMetadata, envelope: &EventEnvelope) -> bool {
        envelope.sequence() <= existing.event_sequence
    }

    async fn apply(&self, envelope: &EventEnvelope, event: DomainEvent) -> Result<()> {
        match event {
            DomainEvent::ProductCreated(created) => {
                if let Some(existing) = self.load(&created.product_id).await? {
                    if Self::is_duplicate(&existing.metadata, envelope) {
                        tracing::debug!(
                            product_id = %created.product_id,
                            sequence = envelope.sequence(),
                            "Duplicate creation ignored"
                        );
                        return Ok(());
                    }
                }
                let view = ProductView {
                    product_id: created.product_id.clone(),
                    name: created.name,
                    category: created.category,
                    price_cents: created.price_cents,
                    previous_price_cents: None,
                    price_updated_at: None,
                    status: ProductStatus::Active,
                    discontinued_reason: None,
                };
                let record = ProjectionRecord::new(view, RecordMetadata::first(envelope));
                self.save(&created.product_id, record).await
            }

            DomainEvent::ProductPriceChanged(changed) => {
                let Some(existing) = self.load(&changed.product_id).await? else {
                    tracing::warn!(
                        product_id = %changed.product_id,
                        sequence = envelope.sequence(),
                        "Price change for unknown product ignored"
                    );
                    return Ok(());
                };
                if Self::is_duplicate(&existing.metadata, envelope) {
                    return Ok(());
                }
                let mut view = existing.data;
                view.previous_price_cents = Some(view.price_cents);
                view.price_cents = changed.price_cents;
                view.price_updated_at = Some(envelope.metadata.occurred_at);
                let record = ProjectionRecord::new(view, existing.metadata.advance(envelope));
                self.save(&changed.product_id, record).await
            }

            DomainEvent::ProductDetailsUpdated(updated) => {
                let Some(existing) = self.load(&updated.product_id).await? else {
                    tracing::warn!(
                        product_id = %updated.product_id,
                        sequence = envelope.sequence(),
                        "Details update for unknown product ignored"
                    );
                    return Ok(());
                };
                if Self::is_duplicate(&existing.metadata, envelope) {
                    return Ok(());
                }
                let mut view = existing.data;
                if let Some(name) = updated.name {
                    view.name = name;
                }
                if let Some(category) = updated.category {
                    view.category = category;
                }
                let record = ProjectionRecord::new(view, existing.metadata.advance(envelope));
                self.save(&updated.product_id, record).await
            }

            DomainEvent::ProductDiscontinued(discontinued) => {
                let Some(existing) = self.load(&discontinued.product_id).await? else {
                    tracing::warn!(
                        product_id = %discontinued.product_id,
                        sequence = envelope.sequence(),
                        "Discontinuation of unknown product ignored"
                    );
                    return Ok(());
                };
                if Self::is_duplicate(&existing.metadata, envelope) {
                    return Ok(());
                }
                let mut view = existing.data;
                view.status = ProductStatus::Discontinued;
                view.discontinued_reason = discontinued.reason;
                let record = ProjectionRecord::new(view, existing.metadata.advance(envelope));
                self.save(&discontinued.product_id, record).await
            }

            // Order events never arrive under product-* patterns, but a
            // misconfigured binding must not fault the subscription.
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

impl EventHandler for ProductViewHandler {
    fn name(&self) -> &str {
        "product-view"
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
