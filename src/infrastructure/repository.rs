//! Relational persistence for thesis records
//!
//! `RecordRepository` is the narrow contract the engine needs; the SQLite
//! implementation backs production use. Upserts are guarded by the unique
//! key so two concurrent workers racing on the same `external_id` can never
//! produce two rows — the dedup gate checks first, this is the second line.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::domain::ThesisRecord;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record '{0}' not found")]
    NotFound(String),
}

/// Outcome of a keyed upsert, distinguishing a fresh insert from the
/// conflict short-circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    AlreadyExisted,
}

/// Capability surface the engine requires from relational persistence.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, PersistError>;

    /// Create-once semantics: an existing row is left untouched and reported
    /// as `AlreadyExisted`.
    async fn upsert_record(&self, record: &ThesisRecord) -> Result<UpsertOutcome, PersistError>;

    /// Add attachment fields to an existing record. Add-only: a record that
    /// already carries an attachment keeps it.
    async fn attach_object(
        &self,
        external_id: &str,
        object_id: &str,
        web_link: &str,
    ) -> Result<(), PersistError>;

    async fn count_records(&self) -> Result<u64, PersistError>;

    /// Records persisted without an attachment, oldest first; maintenance
    /// sessions re-attempt these.
    async fn records_missing_attachment(
        &self,
        limit: u32,
    ) -> Result<Vec<ThesisRecord>, PersistError>;
}

/// SQLite-backed repository.
#[derive(Clone)]
pub struct SqliteRecordRepository {
    pool: SqlitePool,
}

impl SqliteRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist yet.
    pub async fn init_schema(&self) -> Result<(), PersistError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS theses (
                external_id TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                detail_url TEXT NOT NULL,
                heading TEXT NOT NULL,
                full_text TEXT NOT NULL,
                precedent_text TEXT NOT NULL,
                attachment_object_id TEXT,
                attachment_link TEXT,
                ingested_at TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 1,
                analyzed INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> ThesisRecord {
        ThesisRecord {
            external_id: row.get("external_id"),
            title: row.get("title"),
            detail_url: row.get("detail_url"),
            heading: row.get("heading"),
            full_text: row.get("full_text"),
            precedent_text: row.get("precedent_text"),
            attachment_object_id: row.get("attachment_object_id"),
            attachment_link: row.get("attachment_link"),
            ingested_at: row.get("ingested_at"),
            processed: row.get("processed"),
            analyzed: row.get("analyzed"),
        }
    }

    pub async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ThesisRecord>, PersistError> {
        let row = sqlx::query(
            r#"
            SELECT external_id, title, detail_url, heading, full_text, precedent_text,
                   attachment_object_id, attachment_link, ingested_at, processed, analyzed
            FROM theses WHERE external_id = ?
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_record))
    }
}

#[async_trait]
impl RecordRepository for SqliteRecordRepository {
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, PersistError> {
        let row = sqlx::query("SELECT 1 FROM theses WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn upsert_record(&self, record: &ThesisRecord) -> Result<UpsertOutcome, PersistError> {
        let result = sqlx::query(
            r#"
            INSERT INTO theses
            (external_id, title, detail_url, heading, full_text, precedent_text,
             attachment_object_id, attachment_link, ingested_at, processed, analyzed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO NOTHING
            "#,
        )
        .bind(&record.external_id)
        .bind(&record.title)
        .bind(&record.detail_url)
        .bind(&record.heading)
        .bind(&record.full_text)
        .bind(&record.precedent_text)
        .bind(&record.attachment_object_id)
        .bind(&record.attachment_link)
        .bind(record.ingested_at)
        .bind(record.processed)
        .bind(record.analyzed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(UpsertOutcome::AlreadyExisted)
        } else {
            Ok(UpsertOutcome::Inserted)
        }
    }

    async fn attach_object(
        &self,
        external_id: &str,
        object_id: &str,
        web_link: &str,
    ) -> Result<(), PersistError> {
        // Guarded so an existing attachment is never overwritten.
        let result = sqlx::query(
            r#"
            UPDATE theses
            SET attachment_object_id = ?, attachment_link = ?
            WHERE external_id = ? AND attachment_object_id IS NULL
            "#,
        )
        .bind(object_id)
        .bind(web_link)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && !self.exists_by_external_id(external_id).await? {
            return Err(PersistError::NotFound(external_id.to_string()));
        }
        Ok(())
    }

    async fn count_records(&self) -> Result<u64, PersistError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM theses")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn records_missing_attachment(
        &self,
        limit: u32,
    ) -> Result<Vec<ThesisRecord>, PersistError> {
        let rows = sqlx::query(
            r#"
            SELECT external_id, title, detail_url, heading, full_text, precedent_text,
                   attachment_object_id, attachment_link, ingested_at, processed, analyzed
            FROM theses
            WHERE attachment_object_id IS NULL
            ORDER BY ingested_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_record).collect())
    }
}
