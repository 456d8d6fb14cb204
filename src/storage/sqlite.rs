use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{FeedbackSink, PersistRecord};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed feedback sink
#[derive(Clone)]
pub struct SqliteFeedbackSink {
    pool: SqlitePool,
}

impl SqliteFeedbackSink {
    /// Open (or create) the database and run migrations
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let sink = Self { pool };
        sink.run_migrations().await?;

        Ok(sink)
    }

    /// In-memory database, for tests and throwaway runs
    ///
    /// A single connection keeps every query on the same in-memory database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let sink = Self { pool };
        sink.run_migrations().await?;

        Ok(sink)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Underlying pool for ad-hoc queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persisted record counts per category, most frequent first
    pub async fn count_by_category(&self) -> StorageResult<Vec<CategoryCount>> {
        let rows: Vec<CategoryCount> = sqlx::query_as(
            r#"
            SELECT COALESCE(category, 'unknown') AS category,
                   COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0) AS failures
            FROM feedback_records
            GROUP BY category
            ORDER BY total DESC, category ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Most recently persisted records, newest first, optionally of one category
    pub async fn recent(
        &self,
        limit: u32,
        category: Option<&str>,
    ) -> StorageResult<Vec<StoredRecord>> {
        let rows: Vec<StoredRecordRow> = sqlx::query_as(
            r#"
            SELECT id, content, importance, category, success, metadata, persisted_at
            FROM feedback_records
            WHERE ?1 IS NULL OR category = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(category)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredRecord::from).collect())
    }
}

#[async_trait]
impl FeedbackSink for SqliteFeedbackSink {
    async fn persist(&self, records: Vec<PersistRecord>) -> StorageResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let persisted_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for record in &records {
            let category = record
                .metadata
                .get("category")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let success = record.metadata.get("success").and_then(|v| v.as_bool());
            let metadata = serde_json::to_string(&record.metadata).map_err(|e| {
                StorageError::Query {
                    message: format!("Failed to serialize record metadata: {}", e),
                }
            })?;

            sqlx::query(
                r#"
                INSERT INTO feedback_records
                    (content, importance, category, success, metadata, persisted_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.content)
            .bind(record.importance)
            .bind(&category)
            .bind(success)
            .bind(&metadata)
            .bind(&persisted_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(records = records.len(), "Persisted feedback records");
        Ok(records.len())
    }
}

// ============================================================================
// Row types
// ============================================================================

/// Persisted record count of one category.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CategoryCount {
    /// Category name, `unknown` when absent.
    pub category: String,
    /// Records persisted.
    pub total: i64,
    /// Of which failures.
    pub failures: i64,
}

/// A persisted feedback record.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRecord {
    /// Row id.
    pub id: i64,
    /// Summary text.
    pub content: String,
    /// Importance at persistence time.
    pub importance: f64,
    /// Category name, if recorded.
    pub category: Option<String>,
    /// Success flag, if recorded.
    pub success: Option<bool>,
    /// Structured details.
    pub metadata: serde_json::Value,
    /// RFC 3339 persistence timestamp.
    pub persisted_at: String,
}

#[derive(sqlx::FromRow)]
struct StoredRecordRow {
    id: i64,
    content: String,
    importance: f64,
    category: Option<String>,
    success: Option<bool>,
    metadata: String,
    persisted_at: String,
}

impl From<StoredRecordRow> for StoredRecord {
    fn from(row: StoredRecordRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            importance: row.importance,
            category: row.category,
            success: row.success,
            metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
            persisted_at: row.persisted_at,
        }
    }
}
