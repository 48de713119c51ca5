//! Read-only query service over the catalog read models.
//!
//! A thin layer: every method is one store query plus typed decoding.
//! No business logic lives here.

use std::sync::Arc;

use storefront_core::{ProjectionRecord, Result};
use storefront_store::{ProjectionQuery, ProjectionStore, SortOrder};

use crate::availability::{PRODUCT_AVAILABILITY, ProductAvailability};
use crate::product_view::{PRODUCT_VIEW, ProductView};

/// One page of typed product results.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductPage<T> {
    /// Records in this page
    pub items: Vec<T>,
    /// Total records matching the filters
    pub total: u64,
    /// Whether records exist past this page
    pub has_more: bool,
}

/// Queries over the catalog read models.
#[derive(Clone)]
pub struct CatalogQueries {
    store: Arc<dyn ProjectionStore>,
}

impl CatalogQueries {
    /// Create a query service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    /// Fetch one product's full record.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the store read or typed decoding
    /// fails.
    ///
    /// [`ProjectionError`]: storefront_core::ProjectionError
    pub async fn product(&self, product_id: &str) -> Result<Option<ProjectionRecord<ProductView>>> {
        self.store
            .get_projection(PRODUCT_VIEW, product_id)
            .await?
            .map(ProjectionRecord::into_typed)
            .transpose()
    }

    /// List products in a category, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the store read or typed decoding
    /// fails.
    ///
    /// [`ProjectionError`]: storefront_core::ProjectionError
    pub async fn products_by_category(
        &self,
        category: &str,
        limit: usize,
        offset: usize,
    ) -> Result<ProductPage<ProductView>> {
        let page = self
            .store
            .query_projections(
                PRODUCT_VIEW,
                ProjectionQuery::new()
                    .filter("category", category)
                    .sort_by("name", SortOrder::Ascending)
                    .limit(limit)
                    .offset(offset),
            )
            .await?;

        let items = page
            .items
            .into_iter()
            .map(|item| Ok(item.record.into_typed::<ProductView>()?.data))
            .collect::<Result<Vec<_>>>()?;
        Ok(ProductPage {
            items,
            total: page.total,
            has_more: page.has_more,
        })
    }

    /// List purchasable products, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the store read or typed decoding
    /// fails.
    ///
    /// [`ProjectionError`]: storefront_core::ProjectionError
    pub async fn available_products(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<ProductPage<ProductAvailability>> {
        let page = self
            .store
            .query_projections(
                PRODUCT_AVAILABILITY,
                ProjectionQuery::new()
                    .sort_by("name", SortOrder::Ascending)
                    .limit(limit)
                    .offset(offset),
            )
            .await?;

        let items = page
            .items
            .into_iter()
            .map(|item| Ok(item.record.into_typed::<ProductAvailability>()?.data))
            .collect::<Result<Vec<_>>>()?;
        Ok(ProductPage {
            items,
            total: page.total,
            has_more: page.has_more,
        })
    }
}
