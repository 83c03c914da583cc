//! services/twin_data/src/adapters/db.rs
//!
//! This module contains the document store adapter, the concrete implementation
//! of the `DocumentStore` port from the `core` crate. Collections live in one
//! PostgreSQL table keyed by `(collection, partition_key, id)` with a JSONB body.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use twin_data_core::ports::{DocumentQuery, DocumentStore, PortError, PortResult, QueryFilter};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A document store adapter that implements the `DocumentStore` port.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Maps a `sqlx` failure onto the port's error kinds.
pub(crate) fn map_sqlx_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("row not found".to_string()),
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => PortError::Transient(e.to_string()),
        // Serialization failures and deadlocks can succeed on a second attempt.
        sqlx::Error::Database(ref db) if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) => {
            PortError::Transient(e.to_string())
        }
        other => PortError::Permanent(other.to_string()),
    }
}

fn like_pattern(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Builds the partition-scoped SELECT for a `DocumentQuery`. Field names and
/// values are always bound, never spliced into the SQL text.
fn build_query<'a>(collection: &'a str, partition: &'a str, query: &'a DocumentQuery) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT body FROM documents WHERE collection = ");
    qb.push_bind(collection).push(" AND partition_key = ").push_bind(partition);

    for filter in &query.filters {
        match filter {
            QueryFilter::Equals { field, value } => {
                qb.push(" AND body->>").push_bind(field.as_str()).push(" = ").push_bind(value.as_str());
            }
            QueryFilter::Contains { field, value } => {
                qb.push(" AND body->>")
                    .push_bind(field.as_str())
                    .push(" ILIKE ")
                    .push_bind(like_pattern(value));
            }
        }
    }

    match &query.order_by {
        Some(order) => {
            qb.push(" ORDER BY body->>").push_bind(order.field.as_str());
            qb.push(if order.descending { " DESC" } else { " ASC" });
        }
        None => {
            qb.push(" ORDER BY created_at ASC");
        }
    }

    if let Some(limit) = query.limit {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }
    if query.offset > 0 {
        qb.push(" OFFSET ").push_bind(query.offset as i64);
    }
    qb
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn create(&self, collection: &str, partition: &str, id: &str, body: Value) -> PortResult<()> {
        let result = sqlx::query(
            "INSERT INTO documents (collection, partition_key, id, body) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (collection, partition_key, id) DO NOTHING",
        )
        .bind(collection)
        .bind(partition)
        .bind(id)
        .bind(Json(body))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::Permanent(format!(
                "document {} already exists in {}/{}",
                id, collection, partition
            )));
        }
        Ok(())
    }

    async fn read(&self, collection: &str, partition: &str, id: &str) -> PortResult<Value> {
        let row: Option<Json<Value>> = sqlx::query_scalar(
            "SELECT body FROM documents WHERE collection = $1 AND partition_key = $2 AND id = $3",
        )
        .bind(collection)
        .bind(partition)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|Json(body)| body)
            .ok_or_else(|| PortError::NotFound(format!("document {} not found in {}/{}", id, collection, partition)))
    }

    async fn upsert(&self, collection: &str, partition: &str, id: &str, body: Value) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO documents (collection, partition_key, id, body) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (collection, partition_key, id) \
             DO UPDATE SET body = EXCLUDED.body, updated_at = now()",
        )
        .bind(collection)
        .bind(partition)
        .bind(id)
        .bind(Json(body))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, partition: &str, id: &str) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND partition_key = $2 AND id = $3")
            .bind(collection)
            .bind(partition)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "document {} not found in {}/{}",
                id, collection, partition
            )));
        }
        Ok(())
    }

    async fn query(&self, collection: &str, partition: &str, query: &DocumentQuery) -> PortResult<Vec<Value>> {
        let mut qb = build_query(collection, partition, query);
        let rows: Vec<Json<Value>> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(|Json(body)| body).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_binds_partition_filters_and_paging() {
        let query = DocumentQuery::new()
            .equals("Estado", "Entrevista")
            .contains("Empresa", "acme")
            .order_by("CreatedAt", true)
            .page(20, Some(10));
        let qb = build_query("job_opportunities", "t1", &query);
        assert_eq!(
            qb.sql(),
            "SELECT body FROM documents WHERE collection = $1 AND partition_key = $2 \
             AND body->>$3 = $4 AND body->>$5 ILIKE $6 ORDER BY body->>$7 DESC LIMIT $8 OFFSET $9"
        );
    }

    #[test]
    fn unordered_query_falls_back_to_insertion_order() {
        let query = DocumentQuery::new();
        let qb = build_query("books", "t1", &query);
        assert_eq!(
            qb.sql(),
            "SELECT body FROM documents WHERE collection = $1 AND partition_key = $2 ORDER BY created_at ASC"
        );
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn pool_timeouts_are_transient() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(map_sqlx_error(sqlx::Error::RowNotFound).is_not_found());
        assert!(!map_sqlx_error(sqlx::Error::ColumnNotFound("x".into())).is_retryable());
    }
}
