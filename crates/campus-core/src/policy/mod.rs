//! Enrollment policies: pure, ordered predicates over a read-only context.

mod builtin;
mod engine;

pub use builtin::{
    AcademicStandingPolicy, CapacityPolicy, CreditLimitPolicy, PrerequisitePolicy,
    TimeConflictPolicy, RULE_ACADEMIC_STANDING, RULE_CAPACITY, RULE_CREDIT_LIMIT,
    RULE_PREREQUISITE, RULE_TIME_CONFLICT,
};
pub use engine::PolicyEngine;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::{AcademicStanding, ScheduleSlot};

/// One already-scheduled commitment on the student's calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSection {
    pub section_id: Uuid,
    pub course_code: String,
    pub slot: ScheduleSlot,
}

/// Everything a policy may look at, gathered up front by the orchestrator.
///
/// Policies consume this by field access; they never perform I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentContext {
    pub course_code: String,
    pub course_prerequisites: Vec<String>,
    pub course_credits: u32,
    pub section_schedule: ScheduleSlot,
    pub section_max_enrollment: u32,
    pub section_current_enrollment: u32,
    pub student_completed_courses: Vec<String>,
    pub student_current_schedule: Vec<ScheduledSection>,
    pub student_current_credits: u32,
    pub student_gpa: f64,
    pub student_academic_standing: AcademicStanding,
    pub max_credits: u32,
}

/// Outcome of evaluating a single policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub violated_rules: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl PolicyResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            violated_rules: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn allow_with_metadata(metadata: Map<String, Value>) -> Self {
        Self {
            allowed: true,
            reason: None,
            violated_rules: Vec::new(),
            metadata,
        }
    }

    pub fn deny(rule: &str, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            violated_rules: vec![rule.to_string()],
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// A single enrollment rule. Implementations must be pure functions of the
/// context so that re-evaluation on unchanged input yields an equal result.
pub trait EnrollmentPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &EnrollmentContext) -> PolicyResult;
}
