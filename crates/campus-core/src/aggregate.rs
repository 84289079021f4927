//! Enrollment aggregate: the event-sourced state machine behind one
//! (student, section) enrollment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{EnrollmentError, EnrollmentStatus};
use crate::events::{EnrollmentEvent, EventEnvelope, Snapshot};

pub const AGGREGATE_TYPE: &str = "enrollment";

/// The folded state of an enrollment stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentState {
    pub status: Option<EnrollmentStatus>,
    pub student_id: Option<Uuid>,
    pub section_id: Option<Uuid>,
    pub course_code: Option<String>,
    pub waitlist_position: Option<u32>,
    pub enrolled_at: Option<DateTime<Utc>>,
}

/// Aggregate root for one enrollment.
///
/// Commands validate the current state, then record exactly one event in the
/// uncommitted buffer and apply it. The service persists the buffer and calls
/// [`EnrollmentAggregate::mark_committed`]; `version` counts applied events.
#[derive(Debug, Clone)]
pub struct EnrollmentAggregate {
    id: Uuid,
    state: EnrollmentState,
    version: i64,
    uncommitted: Vec<EnrollmentEvent>,
}

impl EnrollmentAggregate {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            state: EnrollmentState::default(),
            version: 0,
            uncommitted: Vec::new(),
        }
    }

    /// Rebuild an aggregate from an optional snapshot plus the events that
    /// follow it. Events must be in stream order.
    pub fn hydrate(
        id: Uuid,
        snapshot: Option<&Snapshot>,
        events: &[EventEnvelope],
    ) -> Result<Self, EnrollmentError> {
        let mut aggregate = match snapshot {
            Some(snap) => {
                let state: EnrollmentState = serde_json::from_value(snap.state.clone())
                    .map_err(|e| anyhow::anyhow!("corrupt snapshot for {}: {}", id, e))?;
                Self {
                    id,
                    state,
                    version: snap.version,
                    uncommitted: Vec::new(),
                }
            }
            None => Self::new(id),
        };

        for envelope in events {
            aggregate.apply(&envelope.event);
            aggregate.version += 1;
        }

        Ok(aggregate)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &EnrollmentState {
        &self.state
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn status(&self) -> Option<EnrollmentStatus> {
        self.state.status
    }

    /// Version of the stream before the uncommitted events were raised.
    /// This is the `expected_version` for the upcoming append.
    pub fn committed_version(&self) -> i64 {
        self.version - self.uncommitted.len() as i64
    }

    pub fn uncommitted_events(&self) -> &[EnrollmentEvent] {
        &self.uncommitted
    }

    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }

    /// Serialize the current state for snapshotting.
    pub fn snapshot(&self) -> Result<Snapshot, EnrollmentError> {
        let state = serde_json::to_value(&self.state)
            .map_err(|e| anyhow::anyhow!("snapshot serialization failed: {}", e))?;
        Ok(Snapshot {
            aggregate_id: self.id,
            aggregate_type: AGGREGATE_TYPE.to_string(),
            state,
            version: self.version,
            event_count: self.version,
            taken_at: Utc::now(),
        })
    }

    fn status_name(&self) -> &'static str {
        match self.state.status {
            None => "none",
            Some(status) => status.as_str(),
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub fn enroll(
        &mut self,
        student_id: Uuid,
        section_id: Uuid,
        course_code: &str,
        enrolled_at: DateTime<Utc>,
    ) -> Result<(), EnrollmentError> {
        if self.state.status.is_some() {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status_name(),
                action: "enroll",
            });
        }
        self.raise(EnrollmentEvent::StudentEnrolled {
            enrollment_id: self.id,
            student_id,
            section_id,
            course_code: course_code.to_string(),
            enrolled_at,
        });
        Ok(())
    }

    pub fn waitlist(
        &mut self,
        student_id: Uuid,
        section_id: Uuid,
        course_code: &str,
        position: u32,
        waitlisted_at: DateTime<Utc>,
    ) -> Result<(), EnrollmentError> {
        if self.state.status.is_some() {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status_name(),
                action: "waitlist",
            });
        }
        self.raise(EnrollmentEvent::StudentWaitlisted {
            enrollment_id: self.id,
            student_id,
            section_id,
            course_code: course_code.to_string(),
            position,
            waitlisted_at,
        });
        Ok(())
    }

    pub fn promote(&mut self, promoted_at: DateTime<Utc>) -> Result<(), EnrollmentError> {
        if self.state.status != Some(EnrollmentStatus::Waitlisted) {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status_name(),
                action: "promote",
            });
        }
        self.raise(EnrollmentEvent::StudentPromoted {
            enrollment_id: self.id,
            student_id: self.state.student_id.unwrap_or_default(),
            section_id: self.state.section_id.unwrap_or_default(),
            promoted_at,
        });
        Ok(())
    }

    pub fn drop_enrollment(&mut self, dropped_at: DateTime<Utc>) -> Result<(), EnrollmentError> {
        if !matches!(
            self.state.status,
            Some(EnrollmentStatus::Enrolled) | Some(EnrollmentStatus::Waitlisted)
        ) {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status_name(),
                action: "drop",
            });
        }
        self.raise(EnrollmentEvent::StudentDropped {
            enrollment_id: self.id,
            student_id: self.state.student_id.unwrap_or_default(),
            section_id: self.state.section_id.unwrap_or_default(),
            dropped_at,
        });
        Ok(())
    }

    pub fn complete(&mut self, completed_at: DateTime<Utc>) -> Result<(), EnrollmentError> {
        if self.state.status != Some(EnrollmentStatus::Enrolled) {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status_name(),
                action: "complete",
            });
        }
        self.raise(EnrollmentEvent::EnrollmentCompleted {
            enrollment_id: self.id,
            student_id: self.state.student_id.unwrap_or_default(),
            section_id: self.state.section_id.unwrap_or_default(),
            completed_at,
        });
        Ok(())
    }

    fn raise(&mut self, event: EnrollmentEvent) {
        self.apply(&event);
        self.version += 1;
        self.uncommitted.push(event);
    }

    fn apply(&mut self, event: &EnrollmentEvent) {
        match event {
            EnrollmentEvent::StudentEnrolled {
                student_id,
                section_id,
                course_code,
                enrolled_at,
                ..
            } => {
                self.state.status = Some(EnrollmentStatus::Enrolled);
                self.state.student_id = Some(*student_id);
                self.state.section_id = Some(*section_id);
                self.state.course_code = Some(course_code.clone());
                self.state.waitlist_position = None;
                self.state.enrolled_at = Some(*enrolled_at);
            }
            EnrollmentEvent::StudentWaitlisted {
                student_id,
                section_id,
                course_code,
                position,
                waitlisted_at,
                ..
            } => {
                self.state.status = Some(EnrollmentStatus::Waitlisted);
                self.state.student_id = Some(*student_id);
                self.state.section_id = Some(*section_id);
                self.state.course_code = Some(course_code.clone());
                self.state.waitlist_position = Some(*position);
                self.state.enrolled_at = Some(*waitlisted_at);
            }
            EnrollmentEvent::StudentPromoted { promoted_at, .. } => {
                self.state.status = Some(EnrollmentStatus::Enrolled);
                self.state.waitlist_position = None;
                self.state.enrolled_at = Some(*promoted_at);
            }
            EnrollmentEvent::StudentDropped { .. } => {
                self.state.status = Some(EnrollmentStatus::Dropped);
                self.state.waitlist_position = None;
            }
            EnrollmentEvent::EnrollmentCompleted { .. } => {
                self.state.status = Some(EnrollmentStatus::Completed);
            }
        }
    }
}
