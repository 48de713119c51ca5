//! The product availability index.
//!
//! A deliberately thin read model: one small record per purchasable
//! product. Discontinuation removes the record outright — storefront
//! surfaces only ever ask "what can be bought right now", so absence is
//! the answer and no tombstone is kept. The full history stays in
//! [`ProductView`].
//!
//! [`ProductView`]: crate::product_view::ProductView

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

/// Projection type key for availability records.
pub const PRODUCT_AVAILABILITY: &str = "product_availability";

/// One purchasable product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAvailability {
    /// Product identifier (the entity id)
    pub product_id: String,
    /// Display name
    pub name: String,
    /// Current price in cents
    pub price_cents: i64,
}

/// Projects `product-*` events into the availability index.
pub struct ProductAvailabilityHandler {
    store: Arc<dyn ProjectionStore>,
}

impl ProductAvailabilityHandler {
    /// Create a handler writing to the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    async fn load(
        &self,
        product_id: &str,
    ) -> Result<Option<ProjectionRecord<ProductAvailability>>> {
        self.store
            .get_projection(PRODUCT_AVAILABILITY, product_id)
            .await?
            .map(ProjectionRecord::into_typed)
            .transpose()
    }

    async fn save(
        &self,
        product_id: &str,
        record: ProjectionRecord<ProductAvailability>,
    ) -> Result<()> {
        let outcome = self
            .store
            .store_projection(PRODUCT_AVAILABILITY, product_id, record.into_document()?)
            .await?;
        if !outcome.is_applied() {
            tracing::debug!(product_id, "Availability write was stale");
        }
        Ok(())
    }

    async fn apply(&self, envelope: &EventEnvelope, event: DomainEvent) -> Result<()> {
        match event {
            DomainEvent::ProductCreated(created) => {
                if let Some(existing) = self.load(&created.product_id).await? {
                    if envelope.sequence() <= existing.metadata.event_sequence {
                        return Ok(());
                    }
                }
                let record = ProjectionRecord::new(
                    ProductAvailability {
                        product_id: created.product_id.clone(),
                        name: created.name,
                        price_cents: created.price_cents,
                    },
                    RecordMetadata::first(envelope),
                );
                self.save(&created.product_id, record).await
            }

            DomainEvent::ProductPriceChanged(changed) => {
                let Some(existing) = self.load(&changed.product_id).await? else {
                    // Unknown here usually means already discontinued
                    tracing::debug!(
                        product_id = %changed.product_id,
                        "Price change for unlisted product ignored"
                    );
                    return Ok(());
                };
                if envelope.sequence() <= existing.metadata.event_sequence {
                    return Ok(());
                }
                let mut entry = existing.data;
                entry.price_cents = changed.price_cents;
                let record = ProjectionRecord::new(entry, existing.metadata.advance(envelope));
                self.save(&changed.product_id, record).await
            }

            DomainEvent::ProductDetailsUpdated(updated) => {
                let Some(existing) = self.load(&updated.product_id).await? else {
                    tracing::debug!(
                        product_id = %updated.product_id,
                        "Details update for unlisted product ignored"
                    );
                    return Ok(());
                };
                if envelope.sequence() <= existing.metadata.event_sequence {
                    return Ok(());
                }
                let mut entry = existing.data;
                if let Some(name) = updated.name {
                    entry.name = name;
                }
                let record = ProjectionRecord::new(entry, existing.metadata.advance(envelope));
                self.save(&updated.product_id, record).await
            }

            DomainEvent::ProductDiscontinued(discontinued) => {
                // Hard delete; redelivery just deletes nothing
                let removed = self
                    .store
                    .delete_projection(PRODUCT_AVAILABILITY, &discontinued.product_id)
                    .await?;
                if removed {
                    tracing::info!(
                        product_id = %discontinued.product_id,
                        "Product removed from availability index"
                    );
                }
                Ok(())
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

impl EventHandler for ProductAvailabilityHandler {
    fn name(&self) -> &str {
        "product-availability"
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
