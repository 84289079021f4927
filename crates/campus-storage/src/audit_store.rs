//! Durable audit chain. Appends serialize on an in-process tail lock; the
//! chain is process-owned, so this is sufficient to keep links intact.

use async_trait::async_trait;
use campus_core::audit::{AuditAction, AuditEntry, AuditError, AuditRecord, AuditStore};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{query, query_as, SqlitePool};
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct SqliteAuditStore {
    pool: SqlitePool,
    tail_lock: Mutex<()>,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            tail_lock: Mutex::new(()),
        }
    }

    /// Get the underlying pool for transaction creation
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    actor_id: Option<String>,
    timestamp: i64,
    metadata: String,
    previous_hash: String,
    entry_hash: String,
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditEntry, AuditError> {
        let metadata: Map<String, Value> = serde_json::from_str(&self.metadata)
            .map_err(|e| AuditError::Backend(anyhow::anyhow!("bad audit metadata: {}", e)))?;
        Ok(AuditEntry {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| AuditError::Backend(anyhow::anyhow!("bad audit id: {}", e)))?,
            action: self
                .action
                .parse::<AuditAction>()
                .map_err(|e| AuditError::Backend(anyhow::anyhow!(e)))?,
            resource_type: self.resource_type,
            resource_id: self
                .resource_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|e| AuditError::Backend(anyhow::anyhow!("bad resource_id: {}", e)))?,
            actor_id: self
                .actor_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|e| AuditError::Backend(anyhow::anyhow!("bad actor_id: {}", e)))?,
            timestamp: DateTime::from_timestamp_micros(self.timestamp)
                .unwrap_or_else(Utc::now),
            metadata,
            previous_hash: self.previous_hash,
            entry_hash: self.entry_hash,
        })
    }
}

fn backend(err: sqlx::Error) -> AuditError {
    AuditError::Backend(err.into())
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<AuditEntry, AuditError> {
        // Read-then-append must be atomic with respect to other writers.
        let _guard = self.tail_lock.lock().await;

        let previous_hash: Option<String> =
            sqlx::query_scalar("SELECT entry_hash FROM audit_log ORDER BY rowid DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        let entry = AuditEntry::create(record, previous_hash.as_deref().unwrap_or(""));

        query(
            "INSERT INTO audit_log
             (id, action, resource_type, resource_id, actor_id, timestamp, metadata,
              previous_hash, entry_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.action.as_str())
        .bind(&entry.resource_type)
        .bind(entry.resource_id.map(|id| id.to_string()))
        .bind(entry.actor_id.map(|id| id.to_string()))
        .bind(entry.timestamp.timestamp_micros())
        .bind(
            serde_json::to_string(&entry.metadata)
                .map_err(|e| AuditError::Backend(e.into()))?,
        )
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(entry)
    }

    async fn tail(&self) -> Result<Option<AuditEntry>, AuditError> {
        let row: Option<AuditRow> =
            query_as("SELECT * FROM audit_log ORDER BY rowid DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        row.map(AuditRow::into_entry).transpose()
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let rows: Vec<AuditRow> = query_as("SELECT * FROM audit_log ORDER BY rowid ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(AuditRow::into_entry).collect()
    }
}
