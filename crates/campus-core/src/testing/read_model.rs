//! In-memory read model with the same contract as the durable one.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Course, Enrollment, EnrollmentError, EnrollmentStatus, Section, Student};
use crate::policy::ScheduledSection;
use crate::ports::{ReadModelRepository, SectionCounter};

#[derive(Default)]
struct Inner {
    courses: HashMap<Uuid, Course>,
    sections: HashMap<Uuid, Section>,
    students: HashMap<Uuid, Student>,
    enrollments: HashMap<Uuid, Enrollment>,
    completed_courses: HashMap<Uuid, Vec<String>>,
}

/// Reference [`ReadModelRepository`] over a single async mutex, so counter
/// updates are atomic under concurrent callers.
#[derive(Default)]
pub struct InMemoryReadModel {
    inner: Mutex<Inner>,
}

impl InMemoryReadModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_course(&self, course: Course) {
        self.inner.lock().await.courses.insert(course.id, course);
    }

    pub async fn insert_section(&self, section: Section) {
        self.inner.lock().await.sections.insert(section.id, section);
    }

    pub async fn insert_student(&self, student: Student) {
        self.inner.lock().await.students.insert(student.id, student);
    }

    pub async fn set_completed_courses(&self, student_id: Uuid, courses: Vec<String>) {
        self.inner
            .lock()
            .await
            .completed_courses
            .insert(student_id, courses);
    }

    /// All enrollment rows, unordered. Test-inspection helper.
    pub async fn all_enrollments(&self) -> Vec<Enrollment> {
        self.inner.lock().await.enrollments.values().cloned().collect()
    }
}

#[async_trait]
impl ReadModelRepository for InMemoryReadModel {
    async fn get_section(&self, section_id: Uuid) -> anyhow::Result<Option<Section>> {
        Ok(self.inner.lock().await.sections.get(&section_id).cloned())
    }

    async fn get_course(&self, course_id: Uuid) -> anyhow::Result<Option<Course>> {
        Ok(self.inner.lock().await.courses.get(&course_id).cloned())
    }

    async fn get_course_by_code(&self, course_code: &str) -> anyhow::Result<Option<Course>> {
        Ok(self
            .inner
            .lock()
            .await
            .courses
            .values()
            .find(|c| c.course_code == course_code)
            .cloned())
    }

    async fn get_student(&self, student_id: Uuid) -> anyhow::Result<Option<Student>> {
        Ok(self.inner.lock().await.students.get(&student_id).cloned())
    }

    async fn get_completed_courses(&self, student_id: Uuid) -> anyhow::Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut courses = inner
            .completed_courses
            .get(&student_id)
            .cloned()
            .unwrap_or_default();
        // Completed enrollment rows feed the projection as well.
        for enrollment in inner.enrollments.values() {
            if enrollment.student_id != student_id
                || enrollment.status != EnrollmentStatus::Completed
            {
                continue;
            }
            let code = inner
                .sections
                .get(&enrollment.section_id)
                .and_then(|s| inner.courses.get(&s.course_id))
                .map(|c| c.course_code.clone());
            if let Some(code) = code {
                if !courses.contains(&code) {
                    courses.push(code);
                }
            }
        }
        Ok(courses)
    }

    async fn get_current_schedule(
        &self,
        student_id: Uuid,
        semester: &str,
    ) -> anyhow::Result<Vec<ScheduledSection>> {
        let inner = self.inner.lock().await;
        let mut schedule = Vec::new();
        for enrollment in inner.enrollments.values() {
            if enrollment.student_id != student_id
                || enrollment.status != EnrollmentStatus::Enrolled
            {
                continue;
            }
            let Some(section) = inner.sections.get(&enrollment.section_id) else {
                continue;
            };
            if section.semester != semester {
                continue;
            }
            let course_code = inner
                .courses
                .get(&section.course_id)
                .map(|c| c.course_code.clone())
                .unwrap_or_default();
            schedule.push(ScheduledSection {
                section_id: section.id,
                course_code,
                slot: section.schedule.clone(),
            });
        }
        Ok(schedule)
    }

    async fn get_current_credits(
        &self,
        student_id: Uuid,
        semester: &str,
    ) -> anyhow::Result<u32> {
        let inner = self.inner.lock().await;
        let mut credits = 0;
        for enrollment in inner.enrollments.values() {
            if enrollment.student_id != student_id
                || enrollment.status != EnrollmentStatus::Enrolled
            {
                continue;
            }
            let Some(section) = inner.sections.get(&enrollment.section_id) else {
                continue;
            };
            if section.semester != semester {
                continue;
            }
            if let Some(course) = inner.courses.get(&section.course_id) {
                credits += course.credits;
            }
        }
        Ok(credits)
    }

    async fn find_active_enrollment(
        &self,
        student_id: Uuid,
        section_id: Uuid,
    ) -> anyhow::Result<Option<Enrollment>> {
        Ok(self
            .inner
            .lock()
            .await
            .enrollments
            .values()
            .find(|e| {
                e.student_id == student_id
                    && e.section_id == section_id
                    && e.status.is_active()
            })
            .cloned())
    }

    async fn get_enrollment(&self, enrollment_id: Uuid) -> anyhow::Result<Option<Enrollment>> {
        Ok(self
            .inner
            .lock()
            .await
            .enrollments
            .get(&enrollment_id)
            .cloned())
    }

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        // Same guard the durable read model enforces with a partial unique
        // index: at most one active row per (student, section).
        if enrollment.status.is_active() {
            let duplicate = inner.enrollments.values().any(|e| {
                e.id != enrollment.id
                    && e.student_id == enrollment.student_id
                    && e.section_id == enrollment.section_id
                    && e.status.is_active()
            });
            if duplicate {
                return Err(anyhow::Error::new(EnrollmentError::AlreadyEnrolled));
            }
        }
        inner.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(())
    }

    async fn increment_section_counter(
        &self,
        section_id: Uuid,
        counter: SectionCounter,
        delta: i32,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let section = inner
            .sections
            .get_mut(&section_id)
            .ok_or_else(|| anyhow::anyhow!("unknown section {}", section_id))?;

        let value = match counter {
            SectionCounter::CurrentEnrollment => &mut section.current_enrollment,
            SectionCounter::WaitlistSize => &mut section.waitlist_size,
        };
        let next = *value as i64 + delta as i64;
        if next < 0 {
            anyhow::bail!(
                "counter {} on section {} would go negative",
                counter.as_str(),
                section_id
            );
        }
        *value = next as u32;
        Ok(())
    }

    async fn list_enrollments(
        &self,
        student_id: Uuid,
        semester: Option<String>,
    ) -> anyhow::Result<Vec<Enrollment>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Enrollment> = inner
            .enrollments
            .values()
            .filter(|e| e.student_id == student_id)
            .filter(|e| match &semester {
                Some(semester) => inner
                    .sections
                    .get(&e.section_id)
                    .map(|s| &s.semester == semester)
                    .unwrap_or(false),
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.enrolled_at);
        Ok(rows)
    }

    async fn list_waitlisted(&self, section_id: Uuid) -> anyhow::Result<Vec<Enrollment>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Enrollment> = inner
            .enrollments
            .values()
            .filter(|e| {
                e.section_id == section_id && e.status == EnrollmentStatus::Waitlisted
            })
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.waitlist_position);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ReadModelRepository;
    use chrono::Utc;

    fn row(student_id: Uuid, section_id: Uuid, status: EnrollmentStatus) -> Enrollment {
        Enrollment {
            id: Uuid::new_v4(),
            student_id,
            section_id,
            status,
            waitlist_position: None,
            enrolled_at: Utc::now(),
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_second_active_row_is_rejected_as_already_enrolled() {
        let rm = InMemoryReadModel::new();
        let student = Uuid::new_v4();
        let section = Uuid::new_v4();

        let mut first = row(student, section, EnrollmentStatus::Enrolled);
        rm.upsert_enrollment(&first).await.unwrap();

        let second = row(student, section, EnrollmentStatus::Waitlisted);
        let err = rm.upsert_enrollment(&second).await.unwrap_err();
        assert!(matches!(
            EnrollmentError::from(err),
            EnrollmentError::AlreadyEnrolled
        ));

        // Re-upserting the same row (promotion, renumbering) is not a
        // duplicate.
        first.status = EnrollmentStatus::Enrolled;
        rm.upsert_enrollment(&first).await.unwrap();

        // A dropped predecessor frees the slot.
        first.status = EnrollmentStatus::Dropped;
        rm.upsert_enrollment(&first).await.unwrap();
        rm.upsert_enrollment(&second).await.unwrap();
    }
}
