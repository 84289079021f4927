//! The built-in enrollment rules.

use serde_json::{json, Value};

use super::{EnrollmentContext, EnrollmentPolicy, PolicyResult};
use crate::domain::AcademicStanding;

pub const RULE_PREREQUISITE: &str = "prerequisite_requirement";
pub const RULE_CAPACITY: &str = "capacity_limit";
pub const RULE_TIME_CONFLICT: &str = "no_time_conflict";
pub const RULE_CREDIT_LIMIT: &str = "credit_limit";
pub const RULE_ACADEMIC_STANDING: &str = "academic_standing";

/// Every prerequisite of the course must appear in the student's completed
/// courses.
#[derive(Debug, Default)]
pub struct PrerequisitePolicy;

impl EnrollmentPolicy for PrerequisitePolicy {
    fn name(&self) -> &'static str {
        "prerequisite"
    }

    fn evaluate(&self, ctx: &EnrollmentContext) -> PolicyResult {
        let missing: Vec<&String> = ctx
            .course_prerequisites
            .iter()
            .filter(|code| !ctx.student_completed_courses.contains(code))
            .collect();

        if missing.is_empty() {
            return PolicyResult::allow();
        }

        PolicyResult::deny(
            RULE_PREREQUISITE,
            format!(
                "Missing prerequisites for {}: {}",
                ctx.course_code,
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )
        .with_metadata("missing_prerequisites", json!(missing))
    }
}

/// A seat must be open. Waitlist placement is the orchestrator's decision,
/// not this rule's.
#[derive(Debug, Default)]
pub struct CapacityPolicy;

impl EnrollmentPolicy for CapacityPolicy {
    fn name(&self) -> &'static str {
        "capacity"
    }

    fn evaluate(&self, ctx: &EnrollmentContext) -> PolicyResult {
        if ctx.section_current_enrollment < ctx.section_max_enrollment {
            return PolicyResult::allow();
        }

        PolicyResult::deny(
            RULE_CAPACITY,
            format!(
                "Section is full ({}/{})",
                ctx.section_current_enrollment, ctx.section_max_enrollment
            ),
        )
        .with_metadata("current_enrollment", json!(ctx.section_current_enrollment))
        .with_metadata("max_enrollment", json!(ctx.section_max_enrollment))
    }
}

/// The section's meeting pattern must not overlap anything already on the
/// student's calendar for the semester.
#[derive(Debug, Default)]
pub struct TimeConflictPolicy;

impl EnrollmentPolicy for TimeConflictPolicy {
    fn name(&self) -> &'static str {
        "time_conflict"
    }

    fn evaluate(&self, ctx: &EnrollmentContext) -> PolicyResult {
        let conflicts: Vec<Value> = ctx
            .student_current_schedule
            .iter()
            .filter(|scheduled| scheduled.slot.overlaps(&ctx.section_schedule))
            .map(|scheduled| {
                json!({
                    "section_id": scheduled.section_id,
                    "course_code": scheduled.course_code,
                })
            })
            .collect();

        if conflicts.is_empty() {
            return PolicyResult::allow();
        }

        PolicyResult::deny(
            RULE_TIME_CONFLICT,
            "Schedule conflicts with an existing enrollment",
        )
        .with_metadata("conflicting_sections", Value::Array(conflicts))
    }
}

/// Enrolling must not push the student past the semester credit ceiling.
#[derive(Debug)]
pub struct CreditLimitPolicy {
    max_credits: u32,
}

impl CreditLimitPolicy {
    pub fn new(max_credits: u32) -> Self {
        Self { max_credits }
    }
}

impl Default for CreditLimitPolicy {
    fn default() -> Self {
        Self { max_credits: 18 }
    }
}

impl EnrollmentPolicy for CreditLimitPolicy {
    fn name(&self) -> &'static str {
        "credit_limit"
    }

    fn evaluate(&self, ctx: &EnrollmentContext) -> PolicyResult {
        // A per-context ceiling overrides the engine-configured default.
        let limit = if ctx.max_credits > 0 {
            ctx.max_credits
        } else {
            self.max_credits
        };
        let attempted = ctx.student_current_credits + ctx.course_credits;

        if attempted <= limit {
            return PolicyResult::allow();
        }

        PolicyResult::deny(
            RULE_CREDIT_LIMIT,
            format!(
                "Enrolling would carry {} credits, above the {} limit",
                attempted, limit
            ),
        )
        .with_metadata("current_credits", json!(ctx.student_current_credits))
        .with_metadata("course_credits", json!(ctx.course_credits))
        .with_metadata("max_credits", json!(limit))
    }
}

/// Suspended students are denied; probation is allowed but flagged.
#[derive(Debug, Default)]
pub struct AcademicStandingPolicy;

impl EnrollmentPolicy for AcademicStandingPolicy {
    fn name(&self) -> &'static str {
        "academic_standing"
    }

    fn evaluate(&self, ctx: &EnrollmentContext) -> PolicyResult {
        match ctx.student_academic_standing {
            AcademicStanding::Suspended => PolicyResult::deny(
                RULE_ACADEMIC_STANDING,
                "Student is suspended and cannot enroll",
            )
            .with_metadata("academic_standing", json!("suspended")),
            AcademicStanding::Probation => {
                let mut metadata = serde_json::Map::new();
                metadata.insert(
                    "warning".to_string(),
                    json!("student is on academic probation"),
                );
                PolicyResult::allow_with_metadata(metadata)
            }
            AcademicStanding::Good | AcademicStanding::Warning => PolicyResult::allow(),
        }
    }
}
