//! `PostgreSQL` implementations for the projection store and the
//! checkpoint store.
//!
//! # Overview
//!
//! Read models live in a `projections` table keyed by
//! `(projection_type, entity_id)`, with the denormalized state as JSONB
//! and the record metadata flattened into typed columns. Subscription
//! progress lives in `subscription_checkpoints`.
//!
//! Both tables enforce monotonicity in SQL rather than in application
//! code, so the guarantees hold even with several engine processes
//! sharing one database:
//!
//! - a projection upsert only lands when it advances the stored
//!   `version` (`WHERE projections.version < EXCLUDED.version`)
//! - a checkpoint upsert only lands when it advances the stored
//!   `position`
//!
//! # Separate Database (CQRS)
//!
//! Read models can (and usually should) live on a different database
//! than the event log. Use [`PostgresProjectionStore::connect`] with the
//! read-side connection string.
//!
//! # Examples
//!
//! ```ignore
//! use storefront_store::PostgresProjectionStore;
//!
//! let store = PostgresProjectionStore::connect("postgres://localhost/readmodels").await?;
//! store.migrate().await?;
//! ```

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use storefront_core::{
    CheckpointStore, ProjectionError, ProjectionRecord, RecordMetadata, Result, SourceEvent,
    SubscriptionCheckpoint,
};

use crate::{ProjectionQuery, ProjectionStore, QueryItem, QueryPage, SortOrder, WriteOutcome};

/// Columns read back for one projection record, in declaration order.
const RECORD_COLUMNS: &str = "data, version, last_updated, event_sequence, \
     source_stream_id, source_revision, source_event_id, source_event_type";

type RecordRow = (
    serde_json::Value,
    i64,
    DateTime<Utc>,
    i64,
    String,
    i64,
    Uuid,
    String,
);

#[allow(clippy::cast_sign_loss)] // Versions and sequences are always non-negative
fn record_from_row(row: RecordRow) -> ProjectionRecord<serde_json::Value> {
    let (data, version, last_updated, event_sequence, stream_id, revision, event_id, event_type) =
        row;
    ProjectionRecord::new(
        data,
        RecordMetadata {
            version: version as u64,
            last_updated,
            event_sequence: event_sequence as u64,
            source_event: SourceEvent {
                stream_id,
                revision: revision as u64,
                event_id,
                event_type,
            },
        },
    )
}

/// PostgreSQL-backed [`ProjectionStore`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE projections (
///     projection_type TEXT NOT NULL,
///     entity_id TEXT NOT NULL,
///     data JSONB NOT NULL,
///     version BIGINT NOT NULL,
///     last_updated TIMESTAMPTZ NOT NULL,
///     event_sequence BIGINT NOT NULL,
///     source_stream_id TEXT NOT NULL,
///     source_revision BIGINT NOT NULL,
///     source_event_id UUID NOT NULL,
///     source_event_type TEXT NOT NULL,
///     PRIMARY KEY (projection_type, entity_id)
/// );
/// ```
///
/// Queries filter and sort on top-level `data` fields with the JSONB
/// `->` operator; add expression indexes for hot fields as read models
/// grow.
#[derive(Clone)]
pub struct PostgresProjectionStore {
    pool: PgPool,
}

impl PostgresProjectionStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own connection pool.
    ///
    /// Point `database_url` at the read-side database; it does not need
    /// to be the one holding the event log.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10) // Reasonable default for projection traffic
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Run database migrations for the projection and checkpoint tables.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool, for custom queries.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `WHERE` clause and starting bind index for a query's filters.
    ///
    /// Filters bind as pairs: the field name as text, the expected value
    /// as JSONB. `$1` is always the projection type.
    fn filter_clause(query: &ProjectionQuery) -> (String, usize) {
        let mut clause = String::from("WHERE projection_type = $1");
        let mut next_bind = 2;
        for _ in &query.filters {
            clause.push_str(&format!(" AND data -> ${next_bind} = ${}", next_bind + 1));
            next_bind += 2;
        }
        (clause, next_bind)
    }
}

impl ProjectionStore for PostgresProjectionStore {
    fn store_projection(
        &self,
        projection_type: &str,
        entity_id: &str,
        record: ProjectionRecord<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<WriteOutcome>> + Send + '_>> {
        let projection_type = projection_type.to_string();
        let entity_id = entity_id.to_string();
        Box::pin(async move {
            // u64 metadata vs BIGINT columns: wrapping starts at 2^63,
            // far beyond any realistic version or sequence.
            #[allow(clippy::cast_possible_wrap)]
            let (version, event_sequence, revision) = (
                record.metadata.version as i64,
                record.metadata.event_sequence as i64,
                record.metadata.source_event.revision as i64,
            );

            let result = sqlx::query(
                "INSERT INTO projections (projection_type, entity_id, data, version, \
                     last_updated, event_sequence, source_stream_id, source_revision, \
                     source_event_id, source_event_type)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (projection_type, entity_id) DO UPDATE
                 SET data = EXCLUDED.data,
                     version = EXCLUDED.version,
                     last_updated = EXCLUDED.last_updated,
                     event_sequence = EXCLUDED.event_sequence,
                     source_stream_id = EXCLUDED.source_stream_id,
                     source_revision = EXCLUDED.source_revision,
                     source_event_id = EXCLUDED.source_event_id,
                     source_event_type = EXCLUDED.source_event_type
                 WHERE projections.version < EXCLUDED.version",
            )
            .bind(&projection_type)
            .bind(&entity_id)
            .bind(&record.data)
            .bind(version)
            .bind(record.metadata.last_updated)
            .bind(event_sequence)
            .bind(&record.metadata.source_event.stream_id)
            .bind(revision)
            .bind(record.metadata.source_event.event_id)
            .bind(&record.metadata.source_event.event_type)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to store projection: {e}")))?;

            if result.rows_affected() == 1 {
                return Ok(WriteOutcome::Applied(record));
            }

            // The guarded upsert touched nothing: an equal-or-newer
            // version is already stored. Read it back for the caller.
            let existing = self
                .get_projection(&projection_type, &entity_id)
                .await?
                .ok_or_else(|| {
                    ProjectionError::Storage(format!(
                        "Stale write for {projection_type}/{entity_id} but no stored record"
                    ))
                })?;
            Ok(WriteOutcome::Stale(existing))
        })
    }

    fn get_projection(
        &self,
        projection_type: &str,
        entity_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectionRecord<serde_json::Value>>>> + Send + '_>>
    {
        let projection_type = projection_type.to_string();
        let entity_id = entity_id.to_string();
        Box::pin(async move {
            let query = format!(
                "SELECT {RECORD_COLUMNS} FROM projections \
                 WHERE projection_type = $1 AND entity_id = $2"
            );

            let row: Option<RecordRow> = sqlx::query_as(&query)
                .bind(&projection_type)
                .bind(&entity_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ProjectionError::Storage(format!("Failed to get projection: {e}")))?;

            Ok(row.map(record_from_row))
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
            let result = sqlx::query(
                "DELETE FROM projections WHERE projection_type = $1 AND entity_id = $2",
            )
            .bind(&projection_type)
            .bind(&entity_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to delete projection: {e}")))?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn query_projections(
        &self,
        projection_type: &str,
        query: ProjectionQuery,
    ) -> Pin<Box<dyn Future<Output = Result<QueryPage>> + Send + '_>> {
        let projection_type = projection_type.to_string();
        Box::pin(async move {
            let (filter_clause, next_bind) = Self::filter_clause(&query);

            let order_clause = match &query.sort_by {
                // Entity-id tie-break keeps pagination deterministic
                Some(_) => {
                    let direction = match query.sort_order {
                        SortOrder::Ascending => "ASC",
                        SortOrder::Descending => "DESC",
                    };
                    format!("ORDER BY data -> ${next_bind} {direction} NULLS FIRST, entity_id ASC")
                }
                None => "ORDER BY entity_id ASC".to_string(),
            };

            let count_sql = format!("SELECT COUNT(*) FROM projections {filter_clause}");
            let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql).bind(&projection_type);
            for (field, value) in &query.filters {
                count_query = count_query.bind(field).bind(Json(value));
            }
            let (total,): (i64,) = count_query
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ProjectionError::Storage(format!("Failed to count query: {e}")))?;

            let page_sql = format!(
                "SELECT entity_id, {RECORD_COLUMNS} FROM projections \
                 {filter_clause} {order_clause} LIMIT {} OFFSET {}",
                query.limit, query.offset
            );
            let mut page_query = sqlx::query_as::<
                _,
                (
                    String,
                    serde_json::Value,
                    i64,
                    DateTime<Utc>,
                    i64,
                    String,
                    i64,
                    Uuid,
                    String,
                ),
            >(&page_sql)
            .bind(&projection_type);
            for (field, value) in &query.filters {
                page_query = page_query.bind(field).bind(Json(value));
            }
            if let Some(field) = &query.sort_by {
                page_query = page_query.bind(field);
            }

            let rows = page_query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| ProjectionError::Storage(format!("Failed to query projections: {e}")))?;

            let items = rows
                .into_iter()
                .map(|(entity_id, a, b, c, d, e, f, g, h)| QueryItem {
                    entity_id,
                    record: record_from_row((a, b, c, d, e, f, g, h)),
                })
                .collect();

            #[allow(clippy::cast_sign_loss)] // COUNT(*) is never negative
            let total = total as u64;
            Ok(QueryPage {
                items,
                total,
                has_more: total > (query.offset + query.limit) as u64,
            })
        })
    }
}

/// PostgreSQL-backed [`CheckpointStore`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE subscription_checkpoints (
///     stream_pattern TEXT NOT NULL,
///     group_name TEXT NOT NULL,
///     position BIGINT NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL,
///     PRIMARY KEY (stream_pattern, group_name)
/// );
/// ```
///
/// The monotonic-save rule is enforced in the upsert itself, so
/// concurrent writers cannot move a group backward.
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Create a checkpoint store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a checkpoint store with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5) // Checkpoints are low-volume
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn load(
        &self,
        stream_pattern: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubscriptionCheckpoint>>> + Send + '_>> {
        let stream_pattern = stream_pattern.to_string();
        let group = group.to_string();
        Box::pin(async move {
            let row: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
                "SELECT position, updated_at FROM subscription_checkpoints \
                 WHERE stream_pattern = $1 AND group_name = $2",
            )
            .bind(&stream_pattern)
            .bind(&group)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to load checkpoint: {e}")))?;

            Ok(row.map(|(position, updated_at)| {
                #[allow(clippy::cast_sign_loss)] // Positions are always non-negative
                SubscriptionCheckpoint {
                    stream_pattern,
                    group,
                    position: position as u64,
                    updated_at,
                }
            }))
        })
    }

    fn save(
        &self,
        checkpoint: SubscriptionCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Wrapping starts at 2^63 events
            let position = checkpoint.position as i64;

            sqlx::query(
                "INSERT INTO subscription_checkpoints (stream_pattern, group_name, position, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (stream_pattern, group_name) DO UPDATE
                 SET position = EXCLUDED.position,
                     updated_at = EXCLUDED.updated_at
                 WHERE subscription_checkpoints.position < EXCLUDED.position",
            )
            .bind(&checkpoint.stream_pattern)
            .bind(&checkpoint.group)
            .bind(position)
            .bind(checkpoint.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to save checkpoint: {e}")))?;

            Ok(())
        })
    }

    fn reset(
        &self,
        stream_pattern: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let stream_pattern = stream_pattern.to_string();
        let group = group.to_string();
        Box::pin(async move {
            sqlx::query(
                "DELETE FROM subscription_checkpoints \
                 WHERE stream_pattern = $1 AND group_name = $2",
            )
            .bind(&stream_pattern)
            .bind(&group)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to reset checkpoint: {e}")))?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests can unwrap

    use super::*;
    use crate::ProjectionQuery;
    use serde_json::json;

    // Structural tests only; integration tests against real Postgres
    // live in tests/ and require a DATABASE_URL.

    #[test]
    fn filter_clause_binds_pairs_after_projection_type() {
        let query = ProjectionQuery::new()
            .filter("category", "kitchen")
            .filter("status", "active");
        let (clause, next_bind) = PostgresProjectionStore::filter_clause(&query);
        assert_eq!(
            clause,
            "WHERE projection_type = $1 AND data -> $2 = $3 AND data -> $4 = $5"
        );
        assert_eq!(next_bind, 6);
    }

    #[test]
    fn record_row_maps_metadata_columns() {
        let now = Utc::now();
        let event_id = Uuid::new_v4();
        let record = record_from_row((
            json!({ "name": "Kettle" }),
            3,
            now,
            42,
            "product-p-1".to_string(),
            3,
            event_id,
            "ProductPriceChanged.v1".to_string(),
        ));
        assert_eq!(record.metadata.version, 3);
        assert_eq!(record.metadata.event_sequence, 42);
        assert_eq!(record.metadata.source_event.event_id, event_id);
        assert_eq!(record.data, json!({ "name": "Kettle" }));
    }
}
