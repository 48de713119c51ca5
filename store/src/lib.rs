//! Versioned projection store: the consistency anchor of the engine.
//!
//! # Overview
//!
//! The projection store is a versioned key-value document store with
//! equality-filtered, paginated, sorted queries. Records are keyed by
//! `(projection type, entity id)` and carry the metadata defined in
//! `storefront-core` — in particular a strictly increasing `version`.
//!
//! # Why the version check matters
//!
//! Delivery from the event log is at-least-once and cross-stream
//! ordering is not guaranteed. Handlers always compute
//! `incoming.version = existing.version + 1`, so a stale, duplicated,
//! or reordered write arrives with a version the store has already
//! passed — and is rejected as a no-op, returning the unchanged stored
//! record ([`WriteOutcome::Stale`]). This is the correctness backstop
//! beneath the runner's best-effort in-order delivery, and it is what
//! makes "same entity, concurrent handler invocations from different
//! subscriptions" safe.
//!
//! # Implementations
//!
//! - [`InMemoryProjectionStore`]: `HashMap`-backed, used in tests and
//!   for single-process wiring
//! - [`PostgresProjectionStore`]: JSONB-backed, for production; pairs
//!   with [`PostgresCheckpointStore`] for durable subscription progress

pub mod memory;
pub mod postgres;

pub use memory::InMemoryProjectionStore;
pub use postgres::{PostgresCheckpointStore, PostgresProjectionStore};

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use storefront_core::{ProjectionRecord, Result};

/// Sort direction for projection queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    /// Smallest value first
    #[default]
    Ascending,
    /// Largest value first
    Descending,
}

/// An equality-filtered, paginated, sorted query over one projection
/// type.
///
/// # Example
///
/// ```
/// use storefront_store::{ProjectionQuery, SortOrder};
///
/// let query = ProjectionQuery::new()
///     .filter("category", "kitchen")
///     .sort_by("name", SortOrder::Ascending)
///     .limit(20)
///     .offset(40);
/// ```
#[derive(Clone, Debug)]
pub struct ProjectionQuery {
    /// Equality filters on top-level `data` fields
    pub filters: Vec<(String, serde_json::Value)>,
    /// Maximum records returned
    pub limit: usize,
    /// Records skipped before the first returned one
    pub offset: usize,
    /// Top-level `data` field to sort on; entity id order when absent
    pub sort_by: Option<String>,
    /// Sort direction
    pub sort_order: SortOrder,
}

impl Default for ProjectionQuery {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            limit: 50,
            offset: 0,
            sort_by: None,
            sort_order: SortOrder::Ascending,
        }
    }
}

impl ProjectionQuery {
    /// An unfiltered query with the default page size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter on a top-level `data` field.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Set the page size.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the page offset.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sort on a top-level `data` field. Ties are always broken by
    /// entity id so pagination is deterministic.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.sort_order = order;
        self
    }
}

/// One query result: a record together with its entity id.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryItem {
    /// Entity id the record is stored under
    pub entity_id: String,
    /// The stored record
    pub record: ProjectionRecord<serde_json::Value>,
}

/// A page of query results.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryPage {
    /// Records in this page, in query order
    pub items: Vec<QueryItem>,
    /// Total records matching the filters (ignoring pagination)
    pub total: u64,
    /// Whether records exist past `offset + limit`
    pub has_more: bool,
}

/// Result of a versioned write.
///
/// A stale write is *not* an error: at-least-once delivery makes stale
/// writes routine, and callers mostly just move on. The unchanged
/// stored record is returned so callers that care can log what they
/// lost to.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// The write advanced the record's version and was applied
    Applied(ProjectionRecord<serde_json::Value>),
    /// The stored version was already at or past the incoming one; the
    /// store is unchanged
    Stale(ProjectionRecord<serde_json::Value>),
}

impl WriteOutcome {
    /// The record now stored, whichever way the write went.
    #[must_use]
    pub const fn record(&self) -> &ProjectionRecord<serde_json::Value> {
        match self {
            Self::Applied(record) | Self::Stale(record) => record,
        }
    }

    /// Whether the write was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Storage backend for versioned projection records.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn ProjectionStore>`) — handlers
/// and query services take the store as a dependency.
pub trait ProjectionStore: Send + Sync {
    /// Upsert a record with optimistic concurrency.
    ///
    /// If a record exists with `version >= record.metadata.version`,
    /// nothing is written and [`WriteOutcome::Stale`] carries the
    /// unchanged stored record. Callers always compute the incoming
    /// version as `existing.version + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the write fails.
    ///
    /// [`ProjectionError::Storage`]: storefront_core::ProjectionError::Storage
    fn store_projection(
        &self,
        projection_type: &str,
        entity_id: &str,
        record: ProjectionRecord<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<WriteOutcome>> + Send + '_>>;

    /// Read one record. Not-found is `None`, never an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the read fails.
    ///
    /// [`ProjectionError::Storage`]: storefront_core::ProjectionError::Storage
    fn get_projection(
        &self,
        projection_type: &str,
        entity_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectionRecord<serde_json::Value>>>> + Send + '_>>;

    /// Hard-remove one record, returning whether it existed.
    ///
    /// Used by fast-lookup indexes whose purpose is existence checks;
    /// full denormalized records soft-mark instead.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the delete fails.
    ///
    /// [`ProjectionError::Storage`]: storefront_core::ProjectionError::Storage
    fn delete_projection(
        &self,
        projection_type: &str,
        entity_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Run an equality-filtered, paginated, sorted query.
    ///
    /// Ordering is deterministic: ties on the sort field (and queries
    /// without one) fall back to entity id order. `has_more` compares
    /// the total match count against `offset + limit`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    ///
    /// [`ProjectionError::Storage`]: storefront_core::ProjectionError::Storage
    fn query_projections(
        &self,
        projection_type: &str,
        query: ProjectionQuery,
    ) -> Pin<Box<dyn Future<Output = Result<QueryPage>> + Send + '_>>;
}
