//! Read-only query service over the orders read models.

use std::sync::Arc;

use storefront_core::{ProjectionRecord, Result};
use storefront_store::{ProjectionQuery, ProjectionStore, SortOrder};

use crate::open_orders::{OPEN_ORDERS, OpenOrder};
use crate::order_view::{ORDER_VIEW, OrderView};

/// One page of typed order results.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPage<T> {
    /// Records in this page
    pub items: Vec<T>,
    /// Total records matching the filters
    pub total: u64,
    /// Whether records exist past this page
    pub has_more: bool,
}

/// Queries over the orders read models.
#[derive(Clone)]
pub struct OrderQueries {
    store: Arc<dyn ProjectionStore>,
}

impl OrderQueries {
    /// Create a query service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    /// Fetch one order's full record.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the store read or typed decoding
    /// fails.
    ///
    /// [`ProjectionError`]: storefront_core::ProjectionError
    pub async fn order(&self, order_id: &str) -> Result<Option<ProjectionRecord<OrderView>>> {
        self.store
            .get_projection(ORDER_VIEW, order_id)
            .await?
            .map(ProjectionRecord::into_typed)
            .transpose()
    }

    /// List a customer's orders in entity-id order.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the store read or typed decoding
    /// fails.
    ///
    /// [`ProjectionError`]: storefront_core::ProjectionError
    pub async fn orders_for_customer(
        &self,
        customer_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<OrderPage<OrderView>> {
        let page = self
            .store
            .query_projections(
                ORDER_VIEW,
                ProjectionQuery::new()
                    .filter("customerId", customer_id)
                    .limit(limit)
                    .offset(offset),
            )
            .await?;

        let items = page
            .items
            .into_iter()
            .map(|item| item.record.into_typed::<OrderView>().map(|r| r.data))
            .collect::<Result<Vec<_>>>()?;
        Ok(OrderPage {
            items,
            total: page.total,
            has_more: page.has_more,
        })
    }

    /// List orders awaiting fulfilment, largest total first.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the store read or typed decoding
    /// fails.
    ///
    /// [`ProjectionError`]: storefront_core::ProjectionError
    pub async fn open_orders(&self, limit: usize, offset: usize) -> Result<OrderPage<OpenOrder>> {
        let page = self
            .store
            .query_projections(
                OPEN_ORDERS,
                ProjectionQuery::new()
                    .sort_by("totalCents", SortOrder::Descending)
                    .limit(limit)
                    .offset(offset),
            )
            .await?;

        let items = page
            .items
            .into_iter()
            .map(|item| item.record.into_typed::<OpenOrder>().map(|r| r.data))
            .collect::<Result<Vec<_>>>()?;
        Ok(OrderPage {
            items,
            total: page.total,
            has_more: page.has_more,
        })
    }
}
