//! Domain events and the envelopes they travel in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by the enrollment aggregate, one per transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EnrollmentEvent {
    StudentEnrolled {
        enrollment_id: Uuid,
        student_id: Uuid,
        section_id: Uuid,
        course_code: String,
        enrolled_at: DateTime<Utc>,
    },
    StudentWaitlisted {
        enrollment_id: Uuid,
        student_id: Uuid,
        section_id: Uuid,
        course_code: String,
        position: u32,
        waitlisted_at: DateTime<Utc>,
    },
    StudentPromoted {
        enrollment_id: Uuid,
        student_id: Uuid,
        section_id: Uuid,
        promoted_at: DateTime<Utc>,
    },
    StudentDropped {
        enrollment_id: Uuid,
        student_id: Uuid,
        section_id: Uuid,
        dropped_at: DateTime<Utc>,
    },
    EnrollmentCompleted {
        enrollment_id: Uuid,
        student_id: Uuid,
        section_id: Uuid,
        completed_at: DateTime<Utc>,
    },
}

impl EnrollmentEvent {
    /// Wire discriminator, matching the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            EnrollmentEvent::StudentEnrolled { .. } => "student_enrolled",
            EnrollmentEvent::StudentWaitlisted { .. } => "student_waitlisted",
            EnrollmentEvent::StudentPromoted { .. } => "student_promoted",
            EnrollmentEvent::StudentDropped { .. } => "student_dropped",
            EnrollmentEvent::EnrollmentCompleted { .. } => "enrollment_completed",
        }
    }

    pub fn enrollment_id(&self) -> Uuid {
        match self {
            EnrollmentEvent::StudentEnrolled { enrollment_id, .. }
            | EnrollmentEvent::StudentWaitlisted { enrollment_id, .. }
            | EnrollmentEvent::StudentPromoted { enrollment_id, .. }
            | EnrollmentEvent::StudentDropped { enrollment_id, .. }
            | EnrollmentEvent::EnrollmentCompleted { enrollment_id, .. } => *enrollment_id,
        }
    }
}

/// Ambient facts recorded alongside every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub actor_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
}

impl EventMetadata {
    pub fn for_actor(actor_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            correlation_id: None,
        }
    }
}

/// A persisted event: the domain event plus its position in a stream.
///
/// `(stream_id, stream_position)` is unique; positions are 1-based and
/// gap-free within a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub stream_id: String,
    pub stream_position: i64,
    pub timestamp: DateTime<Utc>,
    pub event: EnrollmentEvent,
    pub metadata: EventMetadata,
}

impl EventEnvelope {
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

/// A point-in-time materialization of an aggregate's folded state.
///
/// A snapshot at version `v` equals the fold of events `1..=v`; it is a
/// disposable cache, never the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub state: serde_json::Value,
    pub version: i64,
    pub event_count: i64,
    pub taken_at: DateTime<Utc>,
}

/// Stream naming convention: one stream per aggregate instance.
pub fn enrollment_stream_id(enrollment_id: Uuid) -> String {
    format!("enrollment-{}", enrollment_id)
}
