//! Metadata storage using SQLite
//!
//! This module handles all local metadata storage including:
//! - Issues (indexed ticket metadata with their embedding blobs)
//! - Processed events (idempotency ledger for change notifications)

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::IssueRecord;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::debug;

/// Encode an embedding as little-endian f32 bytes
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode little-endian f32 bytes back into an embedding
pub fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::Snapshot(format!(
            "Embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Raw issue row as stored in sqlite
#[derive(Debug, Clone, FromRow)]
struct IssueRow {
    issue_key: String,
    project_key: String,
    summary: String,
    description: Option<String>,
    preprocessed_text: String,
    content_hash: String,
    embedding: Vec<u8>,
    epic_key: Option<String>,
    labels_json: String,
    components_json: String,
    issue_type: Option<String>,
    status: Option<String>,
    created_at: String,
    updated_at: String,
}

impl IssueRow {
    fn into_record(self) -> Result<IssueRecord> {
        let embedding = blob_to_embedding(&self.embedding)?;
        let labels: Vec<String> = serde_json::from_str(&self.labels_json)?;
        let components: Vec<String> = serde_json::from_str(&self.components_json)?;
        Ok(IssueRecord {
            issue_key: self.issue_key,
            project_key: self.project_key,
            summary: self.summary,
            description: self.description,
            preprocessed_text: self.preprocessed_text,
            content_hash: self.content_hash,
            embedding,
            epic_key: self.epic_key,
            labels,
            components,
            issue_type: self.issue_type,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A processed-event ledger entry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub issue_key: String,
    pub event_type: String,
    pub processed_at: String,
}

/// Metadata database handle
#[derive(Clone)]
pub struct IssueDb {
    pool: SqlitePool,
}

impl IssueDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Create database with path directly (without full config)
    pub async fn new(db_path: &std::path::Path) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        debug!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='issues'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    /// Handle to the processed-event ledger backed by this database
    pub fn event_ledger(&self) -> EventLedger {
        EventLedger {
            pool: self.pool.clone(),
        }
    }

    // ===== Issue Operations =====

    /// Insert or fully replace an issue row. `created_at` of an existing
    /// row is preserved; everything else is replaced.
    pub async fn upsert_issue(&self, record: &IssueRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO issues (issue_key, project_key, summary, description, preprocessed_text,
                                content_hash, embedding, epic_key, labels_json, components_json,
                                issue_type, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(issue_key) DO UPDATE SET
                project_key = excluded.project_key,
                summary = excluded.summary,
                description = excluded.description,
                preprocessed_text = excluded.preprocessed_text,
                content_hash = excluded.content_hash,
                embedding = excluded.embedding,
                epic_key = excluded.epic_key,
                labels_json = excluded.labels_json,
                components_json = excluded.components_json,
                issue_type = excluded.issue_type,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.issue_key)
        .bind(&record.project_key)
        .bind(&record.summary)
        .bind(&record.description)
        .bind(&record.preprocessed_text)
        .bind(&record.content_hash)
        .bind(embedding_to_blob(&record.embedding))
        .bind(&record.epic_key)
        .bind(serde_json::to_string(&record.labels)?)
        .bind(serde_json::to_string(&record.components)?)
        .bind(&record.issue_type)
        .bind(&record.status)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get an issue by key
    pub async fn get_issue(&self, issue_key: &str) -> Result<Option<IssueRecord>> {
        let row = sqlx::query_as::<_, IssueRow>("SELECT * FROM issues WHERE issue_key = ?")
            .bind(issue_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(IssueRow::into_record).transpose()
    }

    /// Delete an issue; returns whether a row existed
    pub async fn delete_issue(&self, issue_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM issues WHERE issue_key = ?")
            .bind(issue_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List issues ordered by update time, newest first
    pub async fn list_issues(&self, limit: usize, offset: usize) -> Result<Vec<IssueRecord>> {
        let rows = sqlx::query_as::<_, IssueRow>(
            "SELECT * FROM issues ORDER BY updated_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(IssueRow::into_record).collect()
    }

    /// All issue rows, keyed order
    pub async fn all_issues(&self) -> Result<Vec<IssueRecord>> {
        let rows = sqlx::query_as::<_, IssueRow>("SELECT * FROM issues ORDER BY issue_key")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(IssueRow::into_record).collect()
    }

    /// Number of stored issues
    pub async fn count_issues(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issues")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

}

/// Idempotency ledger over externally delivered events.
///
/// External delivery is at-least-once; recording each event id once
/// turns redelivery into a no-op for the pipeline.
#[derive(Clone)]
pub struct EventLedger {
    pool: SqlitePool,
}

impl EventLedger {
    /// Whether an event id has already been handled
    pub async fn is_processed(&self, event_id: &str) -> Result<bool> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM processed_events WHERE event_id = ?")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Record an event as handled. A duplicate event id is silently
    /// ignored; redelivery is normal traffic, not an error.
    pub async fn mark_processed(
        &self,
        event_id: &str,
        issue_key: &str,
        event_type: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO processed_events (event_id, issue_key, event_type, processed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(event_id)
        .bind(issue_key)
        .bind(event_type)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of ledger entries
    pub async fn processed_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    /// Ledger entries for one issue, oldest first
    pub async fn events_for_issue(&self, issue_key: &str) -> Result<Vec<ProcessedEvent>> {
        let events = sqlx::query_as::<_, ProcessedEvent>(
            "SELECT * FROM processed_events WHERE issue_key = ? ORDER BY processed_at",
        )
        .bind(issue_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::record_with_meta;
    use tempfile::TempDir;

    async fn setup_test_db() -> (IssueDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = IssueDb::new(&tmp.path().join("test.db")).await.unwrap();
        (db, tmp)
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let embedding = vec![0.25_f32, -1.5, 0.0, 3.75];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob).unwrap(), embedding);
    }

    #[test]
    fn test_blob_with_bad_length_rejected() {
        assert!(blob_to_embedding(&[0, 1, 2]).is_err());
    }

    #[tokio::test]
    async fn test_issue_crud() {
        let (db, _tmp) = setup_test_db().await;

        let rec = record_with_meta(
            "PROJ-1",
            vec![1.0, 0.0],
            Some("PROJ-100"),
            &["bug"],
            &["api"],
        );
        db.upsert_issue(&rec).await.unwrap();

        let loaded = db.get_issue("PROJ-1").await.unwrap().unwrap();
        assert_eq!(loaded.epic_key.as_deref(), Some("PROJ-100"));
        assert_eq!(loaded.labels, vec!["bug"]);
        assert_eq!(loaded.embedding, vec![1.0, 0.0]);

        assert_eq!(db.count_issues().await.unwrap(), 1);
        assert!(db.delete_issue("PROJ-1").await.unwrap());
        assert!(!db.delete_issue("PROJ-1").await.unwrap());
        assert!(db.get_issue("PROJ-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_keeps_created_at() {
        let (db, _tmp) = setup_test_db().await;

        let mut rec = record_with_meta("PROJ-1", vec![1.0, 0.0], None, &[], &[]);
        rec.created_at = "2024-01-01T00:00:00+00:00".to_string();
        db.upsert_issue(&rec).await.unwrap();

        rec.summary = "updated".to_string();
        rec.created_at = "2025-06-01T00:00:00+00:00".to_string();
        rec.updated_at = "2025-06-01T00:00:00+00:00".to_string();
        db.upsert_issue(&rec).await.unwrap();

        let loaded = db.get_issue("PROJ-1").await.unwrap().unwrap();
        assert_eq!(loaded.summary, "updated");
        assert_eq!(loaded.created_at, "2024-01-01T00:00:00+00:00");
        assert_eq!(loaded.updated_at, "2025-06-01T00:00:00+00:00");
        assert_eq!(db.count_issues().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_issues_pagination() {
        let (db, _tmp) = setup_test_db().await;

        for i in 1..=3 {
            let mut rec = record_with_meta(&format!("PROJ-{}", i), vec![1.0, 0.0], None, &[], &[]);
            rec.updated_at = format!("2025-01-0{}T00:00:00+00:00", i);
            db.upsert_issue(&rec).await.unwrap();
        }

        let page = db.list_issues(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].issue_key, "PROJ-3");

        let rest = db.list_issues(2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].issue_key, "PROJ-1");
    }

    #[tokio::test]
    async fn test_event_ledger_idempotent() {
        let (db, _tmp) = setup_test_db().await;
        let ledger = db.event_ledger();

        assert!(!ledger.is_processed("evt-1").await.unwrap());

        ledger
            .mark_processed("evt-1", "PROJ-1", "issue_updated")
            .await
            .unwrap();
        assert!(ledger.is_processed("evt-1").await.unwrap());

        // Duplicate delivery: no error, no second row
        ledger
            .mark_processed("evt-1", "PROJ-1", "issue_updated")
            .await
            .unwrap();
        assert_eq!(ledger.processed_count().await.unwrap(), 1);

        let events = ledger.events_for_issue("PROJ-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "issue_updated");
    }
}
