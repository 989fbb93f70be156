//! SQLite-backed persistence backend.

use super::{PersistenceBackend, RawRecord, RecordMetadata, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

/// Records live in the `records` table created by [`crate::db::init_db`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store over an initialized pool.
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStore { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of records of `kind`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count(&self, kind: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) FROM records WHERE record_kind = ?")
            .bind(kind)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }
}

fn row_to_record(row: &SqliteRow) -> RawRecord {
    RawRecord {
        key_path: row.get("key_path"),
        payload: row.get("payload"),
        metadata: RecordMetadata {
            kind: row.get("record_kind"),
            record_id: row.get("record_id"),
            key: row.get("card_key"),
            opened_at: row.get("opened_at"),
            updated_at: row.get("updated_at"),
        },
    }
}

#[async_trait]
impl PersistenceBackend for SqliteStore {
    async fn enumerate(&self, kind: &str) -> Result<Vec<RawRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT key_path, record_kind, record_id, card_key, opened_at, updated_at, payload
            FROM records
            WHERE record_kind = ?
            ORDER BY key_path ASC
            "#,
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn read(&self, key_path: &str) -> Result<Option<RawRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT key_path, record_kind, record_id, card_key, opened_at, updated_at, payload
            FROM records
            WHERE key_path = ?
            "#,
        )
        .bind(key_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn write(
        &self,
        key_path: &str,
        payload: Vec<u8>,
        metadata: &RecordMetadata,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO records (
                key_path, record_kind, record_id, card_key, opened_at, updated_at,
                payload, written_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key_path) DO UPDATE SET
                record_kind = excluded.record_kind,
                record_id = excluded.record_id,
                card_key = excluded.card_key,
                opened_at = excluded.opened_at,
                updated_at = excluded.updated_at,
                payload = excluded.payload,
                written_at = excluded.written_at
            "#,
        )
        .bind(key_path)
        .bind(&metadata.kind)
        .bind(&metadata.record_id)
        .bind(metadata.key.as_deref())
        .bind(metadata.opened_at)
        .bind(metadata.updated_at)
        .bind(payload)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key_path: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE key_path = ?")
            .bind(key_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
