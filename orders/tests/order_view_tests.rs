//! Handler-level tests for the orders read models, plus one end-to-end
//! run through the orchestrator.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::panic)] // Test assertions panic

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use storefront_core::event::{
    DomainEvent, OrderCancelled, OrderPaid, OrderPlaced, OrderShipped,
};
use storefront_core::EventHandler;
use storefront_orders::{
    register_orders_subscriptions, OpenOrdersHandler, OrderQueries, OrderStatus, OrderViewHandler,
};
use storefront_runner::{SubscriptionOptions, SubscriptionOrchestrator};
use storefront_store::InMemoryProjectionStore;
use storefront_testing::{InMemoryCheckpointStore, InMemoryEventLog};

fn placed(id: &str, customer: &str, total_cents: i64) -> DomainEvent {
    DomainEvent::OrderPlaced(OrderPlaced {
        order_id: id.to_string(),
        customer_id: customer.to_string(),
        item_count: 2,
        total_cents,
    })
}

fn paid(id: &str) -> DomainEvent {
    DomainEvent::OrderPaid(OrderPaid {
        order_id: id.to_string(),
    })
}

fn shipped(id: &str, tracking: &str) -> DomainEvent {
    DomainEvent::OrderShipped(OrderShipped {
        order_id: id.to_string(),
        tracking: tracking.to_string(),
    })
}

fn cancelled(id: &str, reason: Option<&str>) -> DomainEvent {
    DomainEvent::OrderCancelled(OrderCancelled {
        order_id: id.to_string(),
        reason: reason.map(ToString::to_string),
    })
}

struct Fixture {
    log: InMemoryEventLog,
    view: OrderViewHandler,
    open: OpenOrdersHandler,
    queries: OrderQueries,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(InMemoryProjectionStore::new());
        Self {
            log: InMemoryEventLog::new(),
            view: OrderViewHandler::new(store.clone()),
            open: OpenOrdersHandler::new(store.clone()),
            queries: OrderQueries::new(store),
        }
    }

    async fn feed(&self, stream_id: &str, event: &DomainEvent) {
        let envelope = self.log.append(stream_id, event);
        self.view.handle(&envelope).await.unwrap();
        self.open.handle(&envelope).await.unwrap();
    }
}

#[tokio::test]
async fn order_walks_its_lifecycle() {
    let fx = Fixture::new();
    fx.feed("order-o-1", &placed("o-1", "c-1", 4200)).await;

    let view = fx.queries.order("o-1").await.unwrap().unwrap();
    assert_eq!(view.data.status, OrderStatus::Placed);
    let open = fx.queries.open_orders(10, 0).await.unwrap();
    assert_eq!(open.total, 1);
    assert!(!open.items[0].paid);

    fx.feed("order-o-1", &paid("o-1")).await;
    let view = fx.queries.order("o-1").await.unwrap().unwrap();
    assert_eq!(view.data.status, OrderStatus::Paid);
    let open = fx.queries.open_orders(10, 0).await.unwrap();
    assert!(open.items[0].paid, "payment keeps the order open but marks it paid");

    fx.feed("order-o-1", &shipped("o-1", "TRACK-42")).await;
    let view = fx.queries.order("o-1").await.unwrap().unwrap();
    assert_eq!(view.data.status, OrderStatus::Shipped);
    assert_eq!(view.data.tracking.as_deref(), Some("TRACK-42"));
    assert_eq!(view.metadata.version, 3);

    // Shipping closes the open-orders entry
    let open = fx.queries.open_orders(10, 0).await.unwrap();
    assert_eq!(open.total, 0);
}

#[tokio::test]
async fn cancellation_soft_marks_the_view_and_clears_the_index() {
    let fx = Fixture::new();
    fx.feed("order-o-1", &placed("o-1", "c-1", 4200)).await;
    fx.feed("order-o-1", &cancelled("o-1", Some("customer request")))
        .await;

    let view = fx.queries.order("o-1").await.unwrap().unwrap();
    assert_eq!(view.data.status, OrderStatus::Cancelled);
    assert_eq!(view.data.cancelled_reason.as_deref(), Some("customer request"));

    let open = fx.queries.open_orders(10, 0).await.unwrap();
    assert_eq!(open.total, 0);
}

#[tokio::test]
async fn redelivery_does_not_change_state() {
    let fx = Fixture::new();
    fx.feed("order-o-1", &placed("o-1", "c-1", 4200)).await;
    let pay = fx.log.append("order-o-1", &paid("o-1"));
    fx.view.handle(&pay).await.unwrap();
    fx.open.handle(&pay).await.unwrap();

    // Replay both events
    fx.view.handle(&pay).await.unwrap();
    fx.open.handle(&pay).await.unwrap();

    let view = fx.queries.order("o-1").await.unwrap().unwrap();
    assert_eq!(view.metadata.version, 2);
    assert_eq!(view.data.status, OrderStatus::Paid);
}

#[tokio::test]
async fn update_for_unknown_order_is_tolerated() {
    let fx = Fixture::new();
    fx.feed("order-ghost", &paid("ghost")).await;
    fx.feed("order-ghost", &shipped("ghost", "TRACK-1")).await;
    assert!(fx.queries.order("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn customer_listing_filters_by_customer() {
    let fx = Fixture::new();
    fx.feed("order-o-1", &placed("o-1", "c-1", 1000)).await;
    fx.feed("order-o-2", &placed("o-2", "c-2", 2000)).await;
    fx.feed("order-o-3", &placed("o-3", "c-1", 3000)).await;

    let page = fx.queries.orders_for_customer("c-1", 10, 0).await.unwrap();
    assert_eq!(page.total, 2);
    let ids: Vec<_> = page.items.iter().map(|o| o.order_id.as_str()).collect();
    assert_eq!(ids, vec!["o-1", "o-3"]);
}

#[tokio::test]
async fn open_orders_sort_by_total_descending() {
    let fx = Fixture::new();
    fx.feed("order-o-1", &placed("o-1", "c-1", 1000)).await;
    fx.feed("order-o-2", &placed("o-2", "c-2", 9000)).await;
    fx.feed("order-o-3", &placed("o-3", "c-3", 5000)).await;

    let page = fx.queries.open_orders(10, 0).await.unwrap();
    let totals: Vec<_> = page.items.iter().map(|o| o.total_cents).collect();
    assert_eq!(totals, vec![9000, 5000, 1000]);
}

#[tokio::test]
async fn orchestrated_subscriptions_build_both_read_models() {
    let log = InMemoryEventLog::new();
    let store = Arc::new(InMemoryProjectionStore::new());
    let queries = OrderQueries::new(store.clone());
    let orchestrator = SubscriptionOrchestrator::new(
        Arc::new(log.clone()),
        Arc::new(InMemoryCheckpointStore::new()),
    );
    register_orders_subscriptions(&orchestrator, store, SubscriptionOptions::default()).await;
    orchestrator.start_all().await;

    log.append("order-o-1", &placed("o-1", "c-1", 4200));
    log.append("order-o-1", &paid("o-1"));
    log.append("order-o-2", &placed("o-2", "c-2", 1800));
    log.append("order-o-2", &cancelled("o-2", None));

    let mut done = false;
    for _ in 0..500 {
        let o1 = queries.order("o-1").await.unwrap();
        let o2 = queries.order("o-2").await.unwrap();
        let open = queries.open_orders(10, 0).await.unwrap();
        if o1.as_ref().is_some_and(|o| o.data.status == OrderStatus::Paid)
            && o2.as_ref().is_some_and(|o| o.data.status == OrderStatus::Cancelled)
            && open.total == 1
        {
            done = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(done, "read models did not converge");
    orchestrator.stop_all().await;
}
