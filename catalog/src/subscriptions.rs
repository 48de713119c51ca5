//! Catalog subscription wiring.

use std::sync::Arc;

use storefront_core::envelope::StreamPattern;
use storefront_runner::{SubscriptionBinding, SubscriptionOptions, SubscriptionOrchestrator};
use storefront_store::ProjectionStore;

use crate::availability::ProductAvailabilityHandler;
use crate::product_view::ProductViewHandler;

/// Consumer group (and subscription name) for the product view.
pub const PRODUCT_VIEW_GROUP: &str = "catalog-product-view";

/// Consumer group (and subscription name) for the availability index.
pub const PRODUCT_AVAILABILITY_GROUP: &str = "catalog-product-availability";

/// Register the catalog read models with an orchestrator.
///
/// Both subscriptions consume `product-*` under independent consumer
/// groups, so a failure or rebuild of one never stalls the other. Call
/// `start_all` (or `start` per name) afterwards.
pub async fn register_catalog_subscriptions(
    orchestrator: &SubscriptionOrchestrator,
    store: Arc<dyn ProjectionStore>,
    options: SubscriptionOptions,
) {
    let pattern = StreamPattern::new("product-*");

    orchestrator
        .register(
            SubscriptionBinding::new(
                PRODUCT_VIEW_GROUP,
                pattern.clone(),
                PRODUCT_VIEW_GROUP,
                Arc::new(ProductViewHandler::new(Arc::clone(&store))),
            ),
            options.clone(),
        )
        .await;

    orchestrator
        .register(
            SubscriptionBinding::new(
                PRODUCT_AVAILABILITY_GROUP,
                pattern,
                PRODUCT_AVAILABILITY_GROUP,
                Arc::new(ProductAvailabilityHandler::new(store)),
            ),
            options,
        )
        .await;
}
