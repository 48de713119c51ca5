//! # Storefront Catalog
//!
//! Catalog read models projected from `product-*` streams:
//!
//! - [`ProductView`]: the full denormalized product record, including
//!   price history fields. Discontinued products are soft-marked so
//!   admin surfaces can still show them.
//! - [`ProductAvailability`]: a minimal index of purchasable products.
//!   Discontinued products are hard-deleted; presence in the index is
//!   the answer.
//!
//! Each read model runs under its own consumer group, so the two can
//! lag, fail, and rebuild independently.

pub mod availability;
pub mod product_view;
pub mod query;
pub mod subscriptions;

pub use availability::{ProductAvailability, ProductAvailabilityHandler};
pub use product_view::{ProductStatus, ProductView, ProductViewHandler};
pub use query::{CatalogQueries, ProductPage};
pub use subscriptions::register_catalog_subscriptions;
