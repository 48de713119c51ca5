//! Domain events: the closed set of facts this engine consumes.
//!
//! [`DomainEvent`] is a tagged enum over every event kind the read side
//! knows about, with one fully-typed payload struct per kind. Envelopes
//! arrive with raw JSON `data`; [`EventEnvelope::decode`] validates the
//! payload against its kind's schema exactly once, so handlers dispatch
//! with an exhaustive `match` over typed values — there is no
//! string-keyed dispatch and no optional-shaped payload past this
//! boundary.
//!
//! # Event naming
//!
//! Kind identifiers carry a version suffix (`ProductCreated.v1`) so
//! payload schemas can evolve without breaking old consumers. A `type`
//! this enum does not know yields [`EnvelopeError::UnknownEventType`],
//! which handlers route to a single log-and-ignore branch.

use serde::{Deserialize, Serialize};

use crate::envelope::{EnvelopeError, EventEnvelope};

/// Payload of `ProductCreated.v1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
    /// Catalog entity id
    pub product_id: String,
    /// Display name
    pub name: String,
    /// Category slug used by listing queries
    pub category: String,
    /// Initial price in cents
    pub price_cents: i64,
}

/// Payload of `ProductPriceChanged.v1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPriceChanged {
    /// Catalog entity id
    pub product_id: String,
    /// New price in cents
    pub price_cents: i64,
}

/// Payload of `ProductDetailsUpdated.v1`.
///
/// Fields are optional on the wire; `None` means "unchanged".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetailsUpdated {
    /// Catalog entity id
    pub product_id: String,
    /// New display name, if changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New category, if changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Payload of `ProductDiscontinued.v1` — the catalog terminal event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDiscontinued {
    /// Catalog entity id
    pub product_id: String,
    /// Optional operator-supplied reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `OrderPlaced.v1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    /// Order entity id
    pub order_id: String,
    /// Customer who placed the order
    pub customer_id: String,
    /// Number of line items
    pub item_count: u32,
    /// Order total in cents
    pub total_cents: i64,
}

/// Payload of `OrderPaid.v1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaid {
    /// Order entity id
    pub order_id: String,
}

/// Payload of `OrderShipped.v1` — terminal for the open-orders index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderShipped {
    /// Order entity id
    pub order_id: String,
    /// Carrier tracking reference
    pub tracking: String,
}

/// Payload of `OrderCancelled.v1` — terminal for the open-orders index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    /// Order entity id
    pub order_id: String,
    /// Why the order was cancelled, when a reason was given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Every event kind the read side understands.
///
/// The enum is deliberately closed: adding a kind is a compile-time
/// change, and every handler's `match` is checked for exhaustiveness.
#[derive(Clone, Debug, PartialEq)]
pub enum DomainEvent {
    /// A product entered the catalog
    ProductCreated(ProductCreated),
    /// A product's price changed
    ProductPriceChanged(ProductPriceChanged),
    /// A product's name/category changed
    ProductDetailsUpdated(ProductDetailsUpdated),
    /// A product left the catalog (terminal)
    ProductDiscontinued(ProductDiscontinued),
    /// An order was placed
    OrderPlaced(OrderPlaced),
    /// An order was paid
    OrderPaid(OrderPaid),
    /// An order was shipped (terminal for open-orders)
    OrderShipped(OrderShipped),
    /// An order was cancelled (terminal for open-orders)
    OrderCancelled(OrderCancelled),
}

impl DomainEvent {
    /// The versioned kind identifier stored in the envelope's `type`.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ProductCreated(_) => "ProductCreated.v1",
            Self::ProductPriceChanged(_) => "ProductPriceChanged.v1",
            Self::ProductDetailsUpdated(_) => "ProductDetailsUpdated.v1",
            Self::ProductDiscontinued(_) => "ProductDiscontinued.v1",
            Self::OrderPlaced(_) => "OrderPlaced.v1",
            Self::OrderPaid(_) => "OrderPaid.v1",
            Self::OrderShipped(_) => "OrderShipped.v1",
            Self::OrderCancelled(_) => "OrderCancelled.v1",
        }
    }

    /// Serialize this event's payload into envelope `data`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidPayload`] if serialization fails,
    /// which would indicate a bug in the payload types.
    pub fn to_payload(&self) -> Result<serde_json::Value, EnvelopeError> {
        let result = match self {
            Self::ProductCreated(p) => serde_json::to_value(p),
            Self::ProductPriceChanged(p) => serde_json::to_value(p),
            Self::ProductDetailsUpdated(p) => serde_json::to_value(p),
            Self::ProductDiscontinued(p) => serde_json::to_value(p),
            Self::OrderPlaced(p) => serde_json::to_value(p),
            Self::OrderPaid(p) => serde_json::to_value(p),
            Self::OrderShipped(p) => serde_json::to_value(p),
            Self::OrderCancelled(p) => serde_json::to_value(p),
        };
        result.map_err(|e| EnvelopeError::InvalidPayload {
            event_type: self.event_type().to_string(),
            reason: e.to_string(),
        })
    }
}

fn payload<T: for<'de> Deserialize<'de>>(
    event_type: &str,
    data: &serde_json::Value,
) -> Result<T, EnvelopeError> {
    serde_json::from_value(data.clone()).map_err(|e| EnvelopeError::InvalidPayload {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}

impl EventEnvelope {
    /// Validate this envelope's payload against its kind's schema.
    ///
    /// This is the single deserialization boundary: handlers receive
    /// fully-typed payloads and never look at raw `data`.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::UnknownEventType`] if `type` is not a known
    ///   kind (callers log and ignore)
    /// - [`EnvelopeError::InvalidPayload`] if `data` does not match the
    ///   kind's schema
    pub fn decode(&self) -> Result<DomainEvent, EnvelopeError> {
        let t = self.event_type.as_str();
        let event = match t {
            "ProductCreated.v1" => DomainEvent::ProductCreated(payload(t, &self.data)?),
            "ProductPriceChanged.v1" => DomainEvent::ProductPriceChanged(payload(t, &self.data)?),
            "ProductDetailsUpdated.v1" => {
                DomainEvent::ProductDetailsUpdated(payload(t, &self.data)?)
            }
            "ProductDiscontinued.v1" => DomainEvent::ProductDiscontinued(payload(t, &self.data)?),
            "OrderPlaced.v1" => DomainEvent::OrderPlaced(payload(t, &self.data)?),
            "OrderPaid.v1" => DomainEvent::OrderPaid(payload(t, &self.data)?),
            "OrderShipped.v1" => DomainEvent::OrderShipped(payload(t, &self.data)?),
            "OrderCancelled.v1" => DomainEvent::OrderCancelled(payload(t, &self.data)?),
            other => return Err(EnvelopeError::UnknownEventType(other.to_string())),
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests can unwrap
    #![allow(clippy::panic)] // Intentional panic for test assertions

    use super::*;
    use crate::envelope::EventMetadata;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(event_type: &str, data: serde_json::Value) -> EventEnvelope {
        EventEnvelope {
            event_type: event_type.to_string(),
            data,
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                stream_id: "product-p-1".to_string(),
                revision: 1,
                event_sequence: 1,
                occurred_at: Utc::now(),
                correlation_id: None,
                causation_id: None,
            },
        }
    }

    #[test]
    fn decode_known_kind() {
        let env = envelope(
            "ProductPriceChanged.v1",
            json!({ "productId": "p-1", "priceCents": 1500 }),
        );

        let event = env.decode().unwrap();
        assert_eq!(
            event,
            DomainEvent::ProductPriceChanged(ProductPriceChanged {
                product_id: "p-1".to_string(),
                price_cents: 1500,
            })
        );
    }

    #[test]
    fn decode_unknown_kind_is_explicit() {
        let env = envelope("ProductRenamed.v7", json!({}));
        match env.decode() {
            Err(EnvelopeError::UnknownEventType(t)) => assert_eq!(t, "ProductRenamed.v7"),
            other => panic!("expected UnknownEventType, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_malformed_payload() {
        let env = envelope("ProductPriceChanged.v1", json!({ "productId": "p-1" }));
        assert!(matches!(
            env.decode(),
            Err(EnvelopeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn payload_roundtrip_preserves_wire_names() {
        let event = DomainEvent::OrderPlaced(OrderPlaced {
            order_id: "o-1".to_string(),
            customer_id: "c-1".to_string(),
            item_count: 3,
            total_cents: 9_999,
        });

        let value = event.to_payload().unwrap();
        assert!(value.get("orderId").is_some());
        assert!(value.get("customerId").is_some());
        assert!(value.get("itemCount").is_some());
        assert!(value.get("totalCents").is_some());

        let env = envelope(event.event_type(), value);
        assert_eq!(env.decode().unwrap(), event);
    }
}
