//! Durable read model: courses, sections, students, and enrollment rows.

use async_trait::async_trait;
use campus_core::domain::{
    AcademicStanding, Course, Day, Enrollment, EnrollmentError, EnrollmentStatus, ScheduleSlot,
    Section, Student, TimeOfDay,
};
use campus_core::policy::ScheduledSection;
use campus_core::ports::{ReadModelRepository, SectionCounter};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{query, query_as, query_scalar, SqlitePool};
use uuid::Uuid;

pub struct SqliteReadModel {
    pool: SqlitePool,
}

impl SqliteReadModel {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool for transaction creation
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn upsert_course(&self, course: &Course) -> anyhow::Result<()> {
        query(
            "INSERT INTO courses
             (id, course_code, title, credits, level, department, prerequisites, corequisites,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                credits = excluded.credits,
                level = excluded.level,
                department = excluded.department,
                prerequisites = excluded.prerequisites,
                corequisites = excluded.corequisites,
                updated_at = excluded.updated_at",
        )
        .bind(course.id.to_string())
        .bind(&course.course_code)
        .bind(&course.title)
        .bind(course.credits as i64)
        .bind(&course.level)
        .bind(&course.department)
        .bind(serde_json::to_string(&course.prerequisites)?)
        .bind(serde_json::to_string(&course.corequisites)?)
        .bind(course.created_at.timestamp_millis())
        .bind(course.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_section(&self, section: &Section) -> anyhow::Result<()> {
        let days: Vec<String> = section
            .schedule
            .days
            .iter()
            .map(|d| d.as_str().to_string())
            .collect();
        query(
            "INSERT INTO sections
             (id, course_id, section_number, semester, instructor_id, schedule_days,
              start_time, end_time, room_id, max_enrollment, current_enrollment,
              waitlist_size, max_waitlist, add_drop_deadline, withdrawal_deadline,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                semester = excluded.semester,
                instructor_id = excluded.instructor_id,
                schedule_days = excluded.schedule_days,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                room_id = excluded.room_id,
                max_enrollment = excluded.max_enrollment,
                current_enrollment = excluded.current_enrollment,
                waitlist_size = excluded.waitlist_size,
                max_waitlist = excluded.max_waitlist,
                add_drop_deadline = excluded.add_drop_deadline,
                withdrawal_deadline = excluded.withdrawal_deadline,
                updated_at = excluded.updated_at",
        )
        .bind(section.id.to_string())
        .bind(section.course_id.to_string())
        .bind(&section.section_number)
        .bind(&section.semester)
        .bind(section.instructor_id.to_string())
        .bind(serde_json::to_string(&days)?)
        .bind(section.schedule.start.0 as i64)
        .bind(section.schedule.end.0 as i64)
        .bind(section.room_id.map(|id| id.to_string()))
        .bind(section.max_enrollment as i64)
        .bind(section.current_enrollment as i64)
        .bind(section.waitlist_size as i64)
        .bind(section.max_waitlist as i64)
        .bind(section.add_drop_deadline.to_string())
        .bind(section.withdrawal_deadline.to_string())
        .bind(section.created_at.timestamp_millis())
        .bind(section.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_student(&self, student: &Student) -> anyhow::Result<()> {
        query(
            "INSERT INTO students (id, gpa, academic_standing, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                gpa = excluded.gpa,
                academic_standing = excluded.academic_standing,
                updated_at = excluded.updated_at",
        )
        .bind(student.id.to_string())
        .bind(student.gpa)
        .bind(student.academic_standing.as_str())
        .bind(student.created_at.timestamp_millis())
        .bind(student.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_uuid(field: &str, value: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| anyhow::anyhow!("bad {} '{}': {}", field, value, e))
}

fn millis(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value).unwrap_or_else(Utc::now)
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: String,
    course_code: String,
    title: String,
    credits: i64,
    level: String,
    department: String,
    prerequisites: String,
    corequisites: String,
    created_at: i64,
    updated_at: i64,
}

impl CourseRow {
    fn into_course(self) -> anyhow::Result<Course> {
        Ok(Course {
            id: parse_uuid("course id", &self.id)?,
            course_code: self.course_code,
            title: self.title,
            credits: self.credits as u32,
            level: self.level,
            department: self.department,
            prerequisites: serde_json::from_str(&self.prerequisites)?,
            corequisites: serde_json::from_str(&self.corequisites)?,
            created_at: millis(self.created_at),
            updated_at: millis(self.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct SectionRow {
    id: String,
    course_id: String,
    section_number: String,
    semester: String,
    instructor_id: String,
    schedule_days: String,
    start_time: i64,
    end_time: i64,
    room_id: Option<String>,
    max_enrollment: i64,
    current_enrollment: i64,
    waitlist_size: i64,
    max_waitlist: i64,
    add_drop_deadline: String,
    withdrawal_deadline: String,
    created_at: i64,
    updated_at: i64,
}

impl SectionRow {
    fn schedule(&self) -> anyhow::Result<ScheduleSlot> {
        let day_names: Vec<String> = serde_json::from_str(&self.schedule_days)?;
        let days = day_names
            .iter()
            .map(|d| d.parse::<Day>())
            .collect::<Result<Vec<Day>, _>>()
            .map_err(|e| anyhow::anyhow!("bad schedule_days: {}", e))?;
        ScheduleSlot::new(
            days,
            TimeOfDay(self.start_time as u16),
            TimeOfDay(self.end_time as u16),
        )
        .map_err(|e| anyhow::anyhow!("bad schedule interval: {}", e))
    }

    fn into_section(self) -> anyhow::Result<Section> {
        let schedule = self.schedule()?;
        Ok(Section {
            id: parse_uuid("section id", &self.id)?,
            course_id: parse_uuid("course_id", &self.course_id)?,
            section_number: self.section_number,
            semester: self.semester,
            instructor_id: parse_uuid("instructor_id", &self.instructor_id)?,
            schedule,
            room_id: self
                .room_id
                .as_deref()
                .map(|id| parse_uuid("room_id", id))
                .transpose()?,
            max_enrollment: self.max_enrollment as u32,
            current_enrollment: self.current_enrollment as u32,
            waitlist_size: self.waitlist_size as u32,
            max_waitlist: self.max_waitlist as u32,
            add_drop_deadline: self
                .add_drop_deadline
                .parse::<NaiveDate>()
                .map_err(|e| anyhow::anyhow!("bad add_drop_deadline: {}", e))?,
            withdrawal_deadline: self
                .withdrawal_deadline
                .parse::<NaiveDate>()
                .map_err(|e| anyhow::anyhow!("bad withdrawal_deadline: {}", e))?,
            created_at: millis(self.created_at),
            updated_at: millis(self.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct StudentRow {
    id: String,
    gpa: f64,
    academic_standing: String,
    created_at: i64,
    updated_at: i64,
}

impl StudentRow {
    fn into_student(self) -> anyhow::Result<Student> {
        Ok(Student {
            id: parse_uuid("student id", &self.id)?,
            gpa: self.gpa,
            academic_standing: self
                .academic_standing
                .parse::<AcademicStanding>()
                .map_err(|e| anyhow::anyhow!(e))?,
            created_at: millis(self.created_at),
            updated_at: millis(self.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: String,
    student_id: String,
    section_id: String,
    status: String,
    waitlist_position: Option<i64>,
    enrolled_at: i64,
    version: i64,
}

impl EnrollmentRow {
    fn into_enrollment(self) -> anyhow::Result<Enrollment> {
        Ok(Enrollment {
            id: parse_uuid("enrollment id", &self.id)?,
            student_id: parse_uuid("student_id", &self.student_id)?,
            section_id: parse_uuid("section_id", &self.section_id)?,
            status: self
                .status
                .parse::<EnrollmentStatus>()
                .map_err(|e| anyhow::anyhow!(e))?,
            waitlist_position: self.waitlist_position.map(|p| p as u32),
            enrolled_at: millis(self.enrolled_at),
            version: self.version,
        })
    }
}

#[async_trait]
impl ReadModelRepository for SqliteReadModel {
    async fn get_section(&self, section_id: Uuid) -> anyhow::Result<Option<Section>> {
        let row: Option<SectionRow> = query_as("SELECT * FROM sections WHERE id = ?")
            .bind(section_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(SectionRow::into_section).transpose()
    }

    async fn get_course(&self, course_id: Uuid) -> anyhow::Result<Option<Course>> {
        let row: Option<CourseRow> = query_as("SELECT * FROM courses WHERE id = ?")
            .bind(course_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(CourseRow::into_course).transpose()
    }

    async fn get_course_by_code(&self, course_code: &str) -> anyhow::Result<Option<Course>> {
        let row: Option<CourseRow> = query_as("SELECT * FROM courses WHERE course_code = ?")
            .bind(course_code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CourseRow::into_course).transpose()
    }

    async fn get_student(&self, student_id: Uuid) -> anyhow::Result<Option<Student>> {
        let row: Option<StudentRow> = query_as("SELECT * FROM students WHERE id = ?")
            .bind(student_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(StudentRow::into_student).transpose()
    }

    async fn get_completed_courses(&self, student_id: Uuid) -> anyhow::Result<Vec<String>> {
        let codes: Vec<(String,)> = query_as(
            "SELECT DISTINCT c.course_code
             FROM enrollments e
             JOIN sections s ON s.id = e.section_id
             JOIN courses c ON c.id = s.course_id
             WHERE e.student_id = ? AND e.status = 'completed'
             ORDER BY c.course_code",
        )
        .bind(student_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(codes.into_iter().map(|(code,)| code).collect())
    }

    async fn get_current_schedule(
        &self,
        student_id: Uuid,
        semester: &str,
    ) -> anyhow::Result<Vec<ScheduledSection>> {
        let rows: Vec<(String, String, i64, i64, String)> = query_as(
            "SELECT s.id, s.schedule_days, s.start_time, s.end_time, c.course_code
             FROM enrollments e
             JOIN sections s ON s.id = e.section_id
             JOIN courses c ON c.id = s.course_id
             WHERE e.student_id = ? AND s.semester = ? AND e.status = 'enrolled'",
        )
        .bind(student_id.to_string())
        .bind(semester)
        .fetch_all(&self.pool)
        .await?;

        let mut schedule = Vec::with_capacity(rows.len());
        for (id, day_json, start, end, course_code) in rows {
            let day_names: Vec<String> = serde_json::from_str(&day_json)?;
            let days = day_names
                .iter()
                .map(|d| d.parse::<Day>())
                .collect::<Result<Vec<Day>, _>>()
                .map_err(|e| anyhow::anyhow!("bad schedule_days: {}", e))?;
            schedule.push(ScheduledSection {
                section_id: parse_uuid("section id", &id)?,
                course_code,
                slot: ScheduleSlot::new(days, TimeOfDay(start as u16), TimeOfDay(end as u16))
                    .map_err(|e| anyhow::anyhow!("bad schedule interval: {}", e))?,
            });
        }
        Ok(schedule)
    }

    async fn get_current_credits(
        &self,
        student_id: Uuid,
        semester: &str,
    ) -> anyhow::Result<u32> {
        let total: i64 = query_scalar(
            "SELECT COALESCE(SUM(c.credits), 0)
             FROM enrollments e
             JOIN sections s ON s.id = e.section_id
             JOIN courses c ON c.id = s.course_id
             WHERE e.student_id = ? AND s.semester = ? AND e.status = 'enrolled'",
        )
        .bind(student_id.to_string())
        .bind(semester)
        .fetch_one(&self.pool)
        .await?;
        Ok(total as u32)
    }

    async fn find_active_enrollment(
        &self,
        student_id: Uuid,
        section_id: Uuid,
    ) -> anyhow::Result<Option<Enrollment>> {
        let row: Option<EnrollmentRow> = query_as(
            "SELECT * FROM enrollments
             WHERE student_id = ? AND section_id = ? AND status IN ('enrolled', 'waitlisted')",
        )
        .bind(student_id.to_string())
        .bind(section_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(EnrollmentRow::into_enrollment).transpose()
    }

    async fn get_enrollment(&self, enrollment_id: Uuid) -> anyhow::Result<Option<Enrollment>> {
        let row: Option<EnrollmentRow> = query_as("SELECT * FROM enrollments WHERE id = ?")
            .bind(enrollment_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(EnrollmentRow::into_enrollment).transpose()
    }

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> anyhow::Result<()> {
        let result = query(
            "INSERT INTO enrollments
             (id, student_id, section_id, status, waitlist_position, enrolled_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                waitlist_position = excluded.waitlist_position,
                enrolled_at = excluded.enrolled_at,
                version = excluded.version",
        )
        .bind(enrollment.id.to_string())
        .bind(enrollment.student_id.to_string())
        .bind(enrollment.section_id.to_string())
        .bind(enrollment.status.as_str())
        .bind(enrollment.waitlist_position.map(|p| p as i64))
        .bind(enrollment.enrolled_at.timestamp_millis())
        .bind(enrollment.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // The active-uniqueness index caught a second active row for
            // this (student, section): a writer racing us won.
            Err(sqlx::Error::Database(db))
                if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                Err(anyhow::Error::new(EnrollmentError::AlreadyEnrolled))
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn increment_section_counter(
        &self,
        section_id: Uuid,
        counter: SectionCounter,
        delta: i32,
    ) -> anyhow::Result<()> {
        let sql = match counter {
            SectionCounter::CurrentEnrollment => {
                "UPDATE sections SET current_enrollment = current_enrollment + ? WHERE id = ?"
            }
            SectionCounter::WaitlistSize => {
                "UPDATE sections SET waitlist_size = waitlist_size + ? WHERE id = ?"
            }
        };
        let result = query(sql)
            .bind(delta as i64)
            .bind(section_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("unknown section {}", section_id);
        }
        Ok(())
    }

    async fn list_enrollments(
        &self,
        student_id: Uuid,
        semester: Option<String>,
    ) -> anyhow::Result<Vec<Enrollment>> {
        let rows: Vec<EnrollmentRow> = match semester {
            Some(semester) => {
                query_as(
                    "SELECT e.* FROM enrollments e
                     JOIN sections s ON s.id = e.section_id
                     WHERE e.student_id = ? AND s.semester = ?
                     ORDER BY e.enrolled_at ASC",
                )
                .bind(student_id.to_string())
                .bind(semester)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                query_as(
                    "SELECT * FROM enrollments WHERE student_id = ? ORDER BY enrolled_at ASC",
                )
                .bind(student_id.to_string())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(EnrollmentRow::into_enrollment).collect()
    }

    async fn list_waitlisted(&self, section_id: Uuid) -> anyhow::Result<Vec<Enrollment>> {
        let rows: Vec<EnrollmentRow> = query_as(
            "SELECT * FROM enrollments
             WHERE section_id = ? AND status = 'waitlisted'
             ORDER BY waitlist_position ASC",
        )
        .bind(section_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EnrollmentRow::into_enrollment).collect()
    }
}
