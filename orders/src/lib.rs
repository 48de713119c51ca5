//! # Storefront Orders
//!
//! Orders read models projected from `order-*` streams:
//!
//! - [`OrderView`]: the full order record with its lifecycle status.
//!   Cancelled orders are soft-marked and kept for support surfaces.
//! - [`OpenOrder`]: a minimal index of orders still needing fulfilment
//!   attention. Shipping or cancelling an order hard-deletes its entry.
//!
//! Each read model runs under its own consumer group.

pub mod open_orders;
pub mod order_view;
pub mod query;
pub mod subscriptions;

pub use open_orders::{OpenOrder, OpenOrdersHandler};
pub use order_view::{OrderStatus, OrderView, OrderViewHandler};
pub use query::{OrderPage, OrderQueries};
pub use subscriptions::register_orders_subscriptions;
