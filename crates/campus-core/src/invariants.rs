//! Runtime verification of the global enrollment invariants.
//!
//! The monitor is pure and synchronous: given the current section rosters it
//! decides whether a proposed enrollment preserves the invariants, or scans
//! everything pairwise for existing violations. Tests use it as the oracle
//! the policy engine is checked against.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ScheduleSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantViolationType {
    TimeOverlap,
    CapacityExceeded,
    DoubleEnrollment,
}

/// A section's occupancy as the monitor sees it: capacity, meeting pattern,
/// and the roster of actively enrolled students.
#[derive(Debug, Clone)]
pub struct SectionOccupancy {
    pub section_id: Uuid,
    pub capacity: u32,
    pub slot: ScheduleSlot,
    pub enrolled_students: HashSet<Uuid>,
}

/// Outcome of checking one proposed enrollment.
#[derive(Debug, Clone)]
pub struct InvariantCheck {
    pub ok: bool,
    pub reason: Option<String>,
    pub violation: Option<InvariantViolationType>,
}

impl InvariantCheck {
    fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
            violation: None,
        }
    }

    fn violated(violation: InvariantViolationType, reason: String) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            violation: Some(violation),
        }
    }

    /// Turn a failed check into the error assertions raise. A violation here
    /// is a design bug, not user error.
    pub fn into_result(self) -> Result<(), crate::domain::EnrollmentError> {
        match self.violation {
            None => Ok(()),
            Some(violation) => Err(crate::domain::EnrollmentError::InvariantViolation(
                violation,
            )),
        }
    }
}

/// One violation found by a full scan.
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub violation: InvariantViolationType,
    pub student_id: Option<Uuid>,
    pub section_id: Uuid,
    pub related_section_id: Option<Uuid>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct InvariantMonitor;

impl InvariantMonitor {
    pub fn new() -> Self {
        Self
    }

    /// Would enrolling `student_id` into `section_id` preserve the
    /// invariants? Checks double enrollment, capacity, then time overlap
    /// against every other section the student is active in.
    pub fn check_enrollment(
        &self,
        student_id: Uuid,
        section_id: Uuid,
        sections: &HashMap<Uuid, SectionOccupancy>,
    ) -> InvariantCheck {
        let Some(target) = sections.get(&section_id) else {
            return InvariantCheck::violated(
                InvariantViolationType::CapacityExceeded,
                format!("unknown section {}", section_id),
            );
        };

        if target.enrolled_students.contains(&student_id) {
            return InvariantCheck::violated(
                InvariantViolationType::DoubleEnrollment,
                format!(
                    "student {} is already enrolled in section {}",
                    student_id, section_id
                ),
            );
        }

        if target.enrolled_students.len() as u32 >= target.capacity {
            return InvariantCheck::violated(
                InvariantViolationType::CapacityExceeded,
                format!(
                    "section {} is at capacity ({}/{})",
                    section_id,
                    target.enrolled_students.len(),
                    target.capacity
                ),
            );
        }

        for other in sections.values() {
            if other.section_id == section_id {
                continue;
            }
            if other.enrolled_students.contains(&student_id) && other.slot.overlaps(&target.slot) {
                return InvariantCheck::violated(
                    InvariantViolationType::TimeOverlap,
                    format!(
                        "time overlap between section {} and section {} for student {}",
                        section_id, other.section_id, student_id
                    ),
                );
            }
        }

        InvariantCheck::ok()
    }

    /// Pairwise scan of every section for violations of the standing
    /// invariants: rosters within capacity, no student in two overlapping
    /// sections.
    pub fn verify_all(
        &self,
        sections: &HashMap<Uuid, SectionOccupancy>,
    ) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for section in sections.values() {
            if section.enrolled_students.len() as u32 > section.capacity {
                violations.push(InvariantViolation {
                    violation: InvariantViolationType::CapacityExceeded,
                    student_id: None,
                    section_id: section.section_id,
                    related_section_id: None,
                    reason: format!(
                        "section {} holds {} students over capacity {}",
                        section.section_id,
                        section.enrolled_students.len(),
                        section.capacity
                    ),
                });
            }
        }

        let mut ordered: Vec<&SectionOccupancy> = sections.values().collect();
        ordered.sort_by_key(|s| s.section_id);

        for (i, a) in ordered.iter().enumerate() {
            for b in ordered.iter().skip(i + 1) {
                if !a.slot.overlaps(&b.slot) {
                    continue;
                }
                for student in a.enrolled_students.intersection(&b.enrolled_students) {
                    violations.push(InvariantViolation {
                        violation: InvariantViolationType::TimeOverlap,
                        student_id: Some(*student),
                        section_id: a.section_id,
                        related_section_id: Some(b.section_id),
                        reason: format!(
                            "student {} is enrolled in overlapping sections {} and {}",
                            student, a.section_id, b.section_id
                        ),
                    });
                }
            }
        }

        violations
    }
}
