//! Append-only event streams with optimistic version fencing.

mod memory;

pub use memory::MemoryEventStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::EnrollmentAggregate;
use crate::domain::EnrollmentError;
use crate::events::{enrollment_stream_id, EnrollmentEvent, EventEnvelope, EventMetadata, Snapshot};

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream tail moved between read and append. Recoverable: refetch
    /// and retry.
    #[error("Version conflict on stream {stream_id}: expected {expected}, actual {actual}")]
    Conflict {
        stream_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<EventStoreError> for EnrollmentError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::Conflict {
                expected, actual, ..
            } => EnrollmentError::Concurrency { expected, actual },
            EventStoreError::Serialization(e) => EnrollmentError::Repository(e.into()),
            EventStoreError::Backend(e) => EnrollmentError::Repository(e),
        }
    }
}

/// Per-stream append-only log.
///
/// `append` is the only operation with a concurrency hazard; uniqueness of
/// `(stream_id, stream_position)` is the enforcement mechanism. Streams are
/// independently ordered; there is no cross-stream ordering guarantee.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event. With `expected_version = Some(v)` the append fails
    /// with [`EventStoreError::Conflict`] unless the stream tail is exactly
    /// `v`; with `None` it lands at the current tail. The assigned position
    /// is `tail + 1`.
    async fn append(
        &self,
        stream_id: &str,
        expected_version: Option<i64>,
        event: EnrollmentEvent,
        metadata: EventMetadata,
    ) -> Result<EventEnvelope, EventStoreError>;

    /// Read a gap-free, ordered slice of a stream. Bounds are inclusive;
    /// `None` means unbounded on that side.
    async fn read(
        &self,
        stream_id: &str,
        from_version: Option<i64>,
        to_version: Option<i64>,
    ) -> Result<Vec<EventEnvelope>, EventStoreError>;

    /// Current tail position of a stream (0 when empty).
    async fn stream_version(&self, stream_id: &str) -> Result<i64, EventStoreError>;

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError>;

    async fn latest_snapshot(&self, aggregate_id: Uuid)
        -> Result<Option<Snapshot>, EventStoreError>;
}

/// Rebuild an enrollment aggregate: latest snapshot (if any) plus a fold of
/// the events past it.
pub async fn replay(
    store: &dyn EventStore,
    enrollment_id: Uuid,
) -> Result<EnrollmentAggregate, EnrollmentError> {
    let stream_id = enrollment_stream_id(enrollment_id);
    let snapshot = store.latest_snapshot(enrollment_id).await?;
    let from_version = snapshot.as_ref().map(|s| s.version + 1);
    let events = store.read(&stream_id, from_version, None).await?;
    EnrollmentAggregate::hydrate(enrollment_id, snapshot.as_ref(), &events)
}
