//! src/services/record_store.rs
//!
//! Local Record Store: durable, owner-scoped storage of file records in SQLite.
//! The payload of a locally held file lives inline in the row, so a record is
//! self-contained and can be served without touching the remote store.

use crate::models::file_record::{Destination, FileRecord};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record `{0}` not found")]
    RecordNotFound(String),
    #[error("record `{0}` has no destinations and cannot be stored")]
    EmptyRecord(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed persistent store of file records with a secondary index on owner.
#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    /// Insert the record, or replace the stored copy with the same id.
    async fn put(&self, record: &FileRecord) -> StoreResult<()>;

    /// All records of `owner_id`, in the order they were first stored.
    ///
    /// Listed records carry no `local_payload`; fetch it with `get_payload`.
    async fn get_all_by_owner(&self, owner_id: &str) -> StoreResult<Vec<FileRecord>>;

    /// Inline payload of a locally held record, `None` if it has none.
    async fn get_payload(&self, id: &str) -> StoreResult<Option<String>>;

    async fn delete(&self, id: &str) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LocalRecordStore for SqliteRecordStore {
    async fn put(&self, record: &FileRecord) -> StoreResult<()> {
        if record.destinations.is_empty() {
            return Err(StoreError::EmptyRecord(record.id.clone()));
        }
        let byte_size = i64::try_from(record.byte_size).map_err(|err| {
            StoreError::Sqlx(sqlx::Error::Encode(Box::new(err)))
        })?;

        // Upsert keeps the rowid, so listing order stays the first-insert order.
        // A record rebuilt from a listing has no payload; keep the stored one.
        sqlx::query(
            r#"
            INSERT INTO files (
                id, owner_id, name, byte_size, mime_type, checksum, uploaded_at,
                saved_local, saved_remote, local_payload, remote_url, remote_object_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                saved_local = excluded.saved_local,
                saved_remote = excluded.saved_remote,
                local_payload = COALESCE(excluded.local_payload, files.local_payload),
                remote_url = excluded.remote_url,
                remote_object_id = excluded.remote_object_id
            "#,
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(&record.name)
        .bind(byte_size)
        .bind(&record.mime_type)
        .bind(&record.checksum)
        .bind(record.uploaded_at)
        .bind(record.has(Destination::Local))
        .bind(record.has(Destination::Remote))
        .bind(record.local_payload.as_deref())
        .bind(record.remote_url.as_deref())
        .bind(record.remote_object_id.as_deref())
        .execute(&*self.db)
        .await?;

        debug!(id = %record.id, saved_to = %record.saved_to_label(), "stored file record");
        Ok(())
    }

    async fn get_all_by_owner(&self, owner_id: &str) -> StoreResult<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT id, owner_id, name, byte_size, mime_type, checksum, uploaded_at,
                    saved_local, saved_remote, NULL AS local_payload, remote_url, remote_object_id
             FROM files
             WHERE owner_id = ?
             ORDER BY rowid ASC",
        )
        .bind(owner_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }

    async fn get_payload(&self, id: &str) -> StoreResult<Option<String>> {
        let payload = sqlx::query_scalar::<_, Option<String>>(
            "SELECT local_payload FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        Ok(payload)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Apply the embedded schema statement by statement. Every statement is
/// idempotent, so this is safe to run on each start.
pub async fn apply_schema(db: &SqlitePool) -> Result<usize, sqlx::Error> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    for stmt in &statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(statements.len())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> Arc<SqlitePool> {
    // A single connection: every `sqlite::memory:` connection is its own database.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();
    Arc::new(pool)
}
