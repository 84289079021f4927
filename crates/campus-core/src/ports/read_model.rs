//! Read-model port: the query/projection surface the orchestrator consumes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Course, Enrollment, Section, Student};
use crate::policy::ScheduledSection;

/// Which per-section counter to adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionCounter {
    CurrentEnrollment,
    WaitlistSize,
}

impl SectionCounter {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionCounter::CurrentEnrollment => "current_enrollment",
            SectionCounter::WaitlistSize => "waitlist_size",
        }
    }
}

/// Query and projection operations backing the enrollment core.
///
/// The read model is eventually consistent with the event streams: the
/// stream is authoritative, and a replayer reconciles this projection by
/// folding the stream back into `upsert_enrollment`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReadModelRepository: Send + Sync {
    async fn get_section(&self, section_id: Uuid) -> anyhow::Result<Option<Section>>;

    async fn get_course(&self, course_id: Uuid) -> anyhow::Result<Option<Course>>;

    async fn get_course_by_code(&self, course_code: &str) -> anyhow::Result<Option<Course>>;

    async fn get_student(&self, student_id: Uuid) -> anyhow::Result<Option<Student>>;

    /// Course codes the student has finished (completed enrollments).
    async fn get_completed_courses(&self, student_id: Uuid) -> anyhow::Result<Vec<String>>;

    /// The student's enrolled meeting patterns for one semester.
    async fn get_current_schedule(
        &self,
        student_id: Uuid,
        semester: &str,
    ) -> anyhow::Result<Vec<ScheduledSection>>;

    /// Credits the student is enrolled in for one semester.
    async fn get_current_credits(&self, student_id: Uuid, semester: &str)
        -> anyhow::Result<u32>;

    /// The active (enrolled or waitlisted) row for (student, section), if any.
    async fn find_active_enrollment(
        &self,
        student_id: Uuid,
        section_id: Uuid,
    ) -> anyhow::Result<Option<Enrollment>>;

    async fn get_enrollment(&self, enrollment_id: Uuid) -> anyhow::Result<Option<Enrollment>>;

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> anyhow::Result<()>;

    /// Adjust one section counter by `delta` in a single statement.
    async fn increment_section_counter(
        &self,
        section_id: Uuid,
        counter: SectionCounter,
        delta: i32,
    ) -> anyhow::Result<()>;

    /// All of a student's enrollment rows, optionally narrowed to one
    /// semester (owned for mockall).
    async fn list_enrollments(
        &self,
        student_id: Uuid,
        semester: Option<String>,
    ) -> anyhow::Result<Vec<Enrollment>>;

    /// Waitlisted enrollments for a section, ordered by position ascending.
    async fn list_waitlisted(&self, section_id: Uuid) -> anyhow::Result<Vec<Enrollment>>;
}
