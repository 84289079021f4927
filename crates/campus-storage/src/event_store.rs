//! Durable event store. The `UNIQUE (stream_id, stream_position)` index is
//! the last line of defense against concurrent writers; the in-transaction
//! tail check produces the precise expected/actual pair for the common case.

use async_trait::async_trait;
use campus_core::event_store::{EventStore, EventStoreError};
use campus_core::events::{EnrollmentEvent, EventEnvelope, EventMetadata, Snapshot};
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar, SqlitePool};
use uuid::Uuid;

pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: String,
    stream_id: String,
    stream_position: i64,
    timestamp: i64,
    payload: String,
    metadata: String,
}

impl EventRow {
    fn into_envelope(self) -> Result<EventEnvelope, EventStoreError> {
        let event: EnrollmentEvent = serde_json::from_str(&self.payload)?;
        let metadata: EventMetadata = serde_json::from_str(&self.metadata)?;
        let event_id = Uuid::parse_str(&self.event_id)
            .map_err(|e| EventStoreError::Backend(anyhow::anyhow!("bad event_id: {}", e)))?;
        Ok(EventEnvelope {
            event_id,
            stream_id: self.stream_id,
            stream_position: self.stream_position,
            timestamp: DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now),
            event,
            metadata,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    aggregate_id: String,
    aggregate_type: String,
    state: String,
    version: i64,
    event_count: i64,
    taken_at: i64,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<Snapshot, EventStoreError> {
        let aggregate_id = Uuid::parse_str(&self.aggregate_id)
            .map_err(|e| EventStoreError::Backend(anyhow::anyhow!("bad aggregate_id: {}", e)))?;
        Ok(Snapshot {
            aggregate_id,
            aggregate_type: self.aggregate_type,
            state: serde_json::from_str(&self.state)?,
            version: self.version,
            event_count: self.event_count,
            taken_at: DateTime::from_timestamp_millis(self.taken_at).unwrap_or_else(Utc::now),
        })
    }
}

fn backend(err: sqlx::Error) -> EventStoreError {
    EventStoreError::Backend(err.into())
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected_version: Option<i64>,
        event: EnrollmentEvent,
        metadata: EventMetadata,
    ) -> Result<EventEnvelope, EventStoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let tail: i64 = query_scalar(
            "SELECT COALESCE(MAX(stream_position), 0) FROM events WHERE stream_id = ?",
        )
        .bind(stream_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;

        if let Some(expected) = expected_version {
            if tail != expected {
                return Err(EventStoreError::Conflict {
                    stream_id: stream_id.to_string(),
                    expected,
                    actual: tail,
                });
            }
        }

        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            stream_id: stream_id.to_string(),
            stream_position: tail + 1,
            timestamp: Utc::now(),
            event,
            metadata,
        };

        let insert = query(
            "INSERT INTO events
             (event_id, stream_id, stream_position, event_type, timestamp, payload, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(envelope.event_id.to_string())
        .bind(&envelope.stream_id)
        .bind(envelope.stream_position)
        .bind(envelope.event_type())
        .bind(envelope.timestamp.timestamp_millis())
        .bind(serde_json::to_string(&envelope.event)?)
        .bind(serde_json::to_string(&envelope.metadata)?)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {
                tx.commit().await.map_err(backend)?;
                Ok(envelope)
            }
            Err(sqlx::Error::Database(db))
                if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                // A concurrent writer took our position. Report the fence
                // failure with the tail it actually reached.
                drop(tx);
                let actual: i64 = query_scalar(
                    "SELECT COALESCE(MAX(stream_position), 0) FROM events WHERE stream_id = ?",
                )
                .bind(stream_id)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
                Err(EventStoreError::Conflict {
                    stream_id: stream_id.to_string(),
                    expected: expected_version.unwrap_or(tail),
                    actual,
                })
            }
            Err(other) => Err(backend(other)),
        }
    }

    async fn read(
        &self,
        stream_id: &str,
        from_version: Option<i64>,
        to_version: Option<i64>,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let rows: Vec<EventRow> = query_as(
            "SELECT event_id, stream_id, stream_position, timestamp, payload, metadata
             FROM events
             WHERE stream_id = ? AND stream_position >= ? AND stream_position <= ?
             ORDER BY stream_position ASC",
        )
        .bind(stream_id)
        .bind(from_version.unwrap_or(1))
        .bind(to_version.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(EventRow::into_envelope).collect()
    }

    async fn stream_version(&self, stream_id: &str) -> Result<i64, EventStoreError> {
        query_scalar("SELECT COALESCE(MAX(stream_position), 0) FROM events WHERE stream_id = ?")
            .bind(stream_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError> {
        query(
            "INSERT INTO snapshots
             (aggregate_id, aggregate_type, state, version, event_count, taken_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = excluded.aggregate_type,
                state = excluded.state,
                version = excluded.version,
                event_count = excluded.event_count,
                taken_at = excluded.taken_at",
        )
        .bind(snapshot.aggregate_id.to_string())
        .bind(&snapshot.aggregate_type)
        .bind(serde_json::to_string(&snapshot.state)?)
        .bind(snapshot.version)
        .bind(snapshot.event_count)
        .bind(snapshot.taken_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn latest_snapshot(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        let row: Option<SnapshotRow> = query_as(
            "SELECT aggregate_id, aggregate_type, state, version, event_count, taken_at
             FROM snapshots WHERE aggregate_id = ?",
        )
        .bind(aggregate_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(SnapshotRow::into_snapshot).transpose()
    }
}
