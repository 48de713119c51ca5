//! In-memory projection store.
//!
//! `HashMap`-backed implementation of [`ProjectionStore`]. It is the
//! store used by the test suites and is sufficient for single-process
//! wiring; it applies exactly the same version-check semantics as the
//! Postgres implementation.

use std::collections::{BTreeMap, HashMap};
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use storefront_core::{ProjectionRecord, Result};

use crate::{ProjectionQuery, ProjectionStore, QueryItem, QueryPage, SortOrder, WriteOutcome};

type Document = ProjectionRecord<serde_json::Value>;
type TypeMap = BTreeMap<String, Document>;

/// In-memory [`ProjectionStore`] implementation.
///
/// Cloning is cheap and shares the underlying data, so handlers and
/// query services can hold clones of one logical store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryProjectionStore {
    data: Arc<RwLock<HashMap<String, TypeMap>>>,
}

impl InMemoryProjectionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored under one projection type.
    ///
    /// Useful for assertions in tests.
    pub async fn len(&self, projection_type: &str) -> usize {
        self.data
            .read()
            .await
            .get(projection_type)
            .map_or(0, BTreeMap::len)
    }

    /// Whether no records exist under one projection type.
    pub async fn is_empty(&self, projection_type: &str) -> bool {
        self.len(projection_type).await == 0
    }

    /// Drop every record (for test isolation).
    pub async fn clear(&self) {
        self.data.write().await.clear();
    }
}

/// Total order over JSON values for deterministic sorting.
///
/// Missing fields sort before everything; mixed types sort by type rank
/// (null < bool < number < string < other). Numbers compare as f64,
/// which is exact for the integer ranges read models use.
fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    use serde_json::Value;

    const fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x, y) {
            (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
            (Value::Number(l), Value::Number(r)) => l
                .as_f64()
                .partial_cmp(&r.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(l), Value::String(r)) => l.cmp(r),
            (l, r) => rank(l).cmp(&rank(r)),
        },
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    fn store_projection(
        &self,
        projection_type: &str,
        entity_id: &str,
        record: Document,
    ) -> Pin<Box<dyn Future<Output = Result<WriteOutcome>> + Send + '_>> {
        let projection_type = projection_type.to_string();
        let entity_id = entity_id.to_string();
        Box::pin(async move {
            let mut data = self.data.write().await;
            let records = data.entry(projection_type).or_default();

            if let Some(existing) = records.get(&entity_id) {
                if existing.metadata.version >= record.metadata.version {
                    return Ok(WriteOutcome::Stale(existing.clone()));
                }
            }
            records.insert(entity_id, record.clone());
            Ok(WriteOutcome::Applied(record))
        })
    }

    fn get_projection(
        &self,
        projection_type: &str,
        entity_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Document>>> + Send + '_>> {
        let projection_type = projection_type.to_string();
        let entity_id = entity_id.to_string();
        Box::pin(async move {
            Ok(self
                .data
                .read()
                .await
                .get(&projection_type)
                .and_then(|records| records.get(&entity_id))
                .cloned())
        })
    }

    fn delete_projection(
        &self,
        projection_type: &str,
        entity_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let projection_type = projection_type.to_string();
        let entity_id = entity_id.to_string();
        Box::pin(async move {
            let mut data = self.data.write().await;
            Ok(data
                .get_mut(&projection_type)
                .is_some_and(|records| records.remove(&entity_id).is_some()))
        })
    }

    fn query_projections(
        &self,
        projection_type: &str,
        query: ProjectionQuery,
    ) -> Pin<Box<dyn Future<Output = Result<QueryPage>> + Send + '_>> {
        let projection_type = projection_type.to_string();
        Box::pin(async move {
            let data = self.data.read().await;
            let mut matches: Vec<QueryItem> = data
                .get(&projection_type)
                .map(|records| {
                    records
                        .iter()
                        .filter(|(_, record)| {
                            query.filters.iter().all(|(field, value)| {
                                record.data.get(field) == Some(value)
                            })
                        })
                        .map(|(entity_id, record)| QueryItem {
                            entity_id: entity_id.clone(),
                            record: record.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            // BTreeMap iteration already yields entity-id order, which
            // doubles as the tie-break under a stable sort.
            if let Some(field) = &query.sort_by {
                matches.sort_by(|a, b| {
                    let ordering =
                        compare_values(a.record.data.get(field), b.record.data.get(field));
                    match query.sort_order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    }
                });
            }

            let total = matches.len() as u64;
            let has_more = total > (query.offset + query.limit) as u64;
            let items = matches
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .collect();

            Ok(QueryPage {
                items,
                total,
                has_more,
            })
        })
    }
}
