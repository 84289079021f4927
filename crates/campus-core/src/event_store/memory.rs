//! Process-local event store used by tests and simulations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{EventStore, EventStoreError};
use crate::events::{EnrollmentEvent, EventEnvelope, EventMetadata, Snapshot};

#[derive(Default)]
struct MemoryState {
    streams: HashMap<String, Vec<EventEnvelope>>,
    snapshots: HashMap<Uuid, Snapshot>,
}

/// In-memory [`EventStore`] with the same fencing semantics as the durable
/// implementation. Appends are serialized on a single async mutex, so the
/// tail check and the insert are atomic.
#[derive(Default)]
pub struct MemoryEventStore {
    state: Mutex<MemoryState>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams with at least one event.
    pub async fn stream_count(&self) -> usize {
        self.state.lock().await.streams.len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected_version: Option<i64>,
        event: EnrollmentEvent,
        metadata: EventMetadata,
    ) -> Result<EventEnvelope, EventStoreError> {
        let mut state = self.state.lock().await;
        let stream = state.streams.entry(stream_id.to_string()).or_default();
        let tail = stream.len() as i64;

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
        stream.push(envelope.clone());
        Ok(envelope)
    }

    async fn read(
        &self,
        stream_id: &str,
        from_version: Option<i64>,
        to_version: Option<i64>,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let state = self.state.lock().await;
        let Some(stream) = state.streams.get(stream_id) else {
            return Ok(Vec::new());
        };

        let from = from_version.unwrap_or(1);
        let to = to_version.unwrap_or(i64::MAX);
        Ok(stream
            .iter()
            .filter(|e| e.stream_position >= from && e.stream_position <= to)
            .cloned()
            .collect())
    }

    async fn stream_version(&self, stream_id: &str) -> Result<i64, EventStoreError> {
        let state = self.state.lock().await;
        Ok(state
            .streams
            .get(stream_id)
            .map(|s| s.len() as i64)
            .unwrap_or(0))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError> {
        let mut state = self.state.lock().await;
        // Bounded retention: only the latest snapshot per aggregate is kept.
        state.snapshots.insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        let state = self.state.lock().await;
        Ok(state.snapshots.get(&aggregate_id).cloned())
    }
}
