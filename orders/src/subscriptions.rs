//! Orders subscription wiring.

use std::sync::Arc;

use storefront_core::envelope::StreamPattern;
use storefront_runner::{SubscriptionBinding, SubscriptionOptions, SubscriptionOrchestrator};
use storefront_store::ProjectionStore;

use crate::open_orders::OpenOrdersHandler;
use crate::order_view::OrderViewHandler;

/// Consumer group (and subscription name) for the order view.
pub const ORDER_VIEW_GROUP: &str = "orders-order-view";

/// Consumer group (and subscription name) for the open-orders index.
pub const OPEN_ORDERS_GROUP: &str = "orders-open-orders";

/// Register the orders read models with an orchestrator.
///
/// Both subscriptions consume `order-*` under independent consumer
/// groups. Call `start_all` (or `start` per name) afterwards.
pub async fn register_orders_subscriptions(
    orchestrator: &SubscriptionOrchestrator,
    store: Arc<dyn ProjectionStore>,
    options: SubscriptionOptions,
) {
    let pattern = StreamPattern::new("order-*");

    orchestrator
        .register(
            SubscriptionBinding::new(
                ORDER_VIEW_GROUP,
                pattern.clone(),
                ORDER_VIEW_GROUP,
                Arc::new(OrderViewHandler::new(Arc::clone(&store))),
            ),
            options.clone(),
        )
        .await;

    orchestrator
        .register(
            SubscriptionBinding::new(
                OPEN_ORDERS_GROUP,
                pattern,
                OPEN_ORDERS_GROUP,
                Arc::new(OpenOrdersHandler::new(store)),
            ),
            options,
        )
        .await;
}
