//! Canned domain objects for tests.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::{
    AcademicStanding, Course, Day, ScheduleSlot, Section, Student, TimeOfDay,
};
use crate::policy::EnrollmentContext;

pub const SEMESTER: &str = "2025-fall";

pub fn slot(days: Vec<Day>, start: &str, end: &str) -> ScheduleSlot {
    ScheduleSlot::new(
        days,
        TimeOfDay::parse(start).unwrap(),
        TimeOfDay::parse(end).unwrap(),
    )
    .unwrap()
}

pub fn course(code: &str, credits: u32, prerequisites: Vec<&str>) -> Course {
    let now = Utc::now();
    Course {
        id: Uuid::new_v4(),
        course_code: code.to_string(),
        title: format!("{} (test)", code),
        credits,
        level: "undergraduate".to_string(),
        department: "CS".to_string(),
        prerequisites: prerequisites.into_iter().map(String::from).collect(),
        corequisites: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

pub fn section_for(course: &Course, schedule: ScheduleSlot, max_enrollment: u32) -> Section {
    let now = Utc::now();
    Section {
        id: Uuid::new_v4(),
        course_id: course.id,
        section_number: "001".to_string(),
        semester: SEMESTER.to_string(),
        instructor_id: Uuid::new_v4(),
        schedule,
        room_id: None,
        max_enrollment,
        current_enrollment: 0,
        waitlist_size: 0,
        max_waitlist: 10,
        add_drop_deadline: NaiveDate::from_ymd_opt(2025, 9, 12).unwrap(),
        withdrawal_deadline: NaiveDate::from_ymd_opt(2025, 11, 7).unwrap(),
        created_at: now,
        updated_at: now,
    }
}

pub fn section_with_capacity(max_enrollment: u32, max_waitlist: u32) -> Section {
    let course = course("CS-101", 3, vec![]);
    let mut section = section_for(
        &course,
        slot(vec![Day::Monday, Day::Wednesday], "10:00", "11:00"),
        max_enrollment,
    );
    section.max_waitlist = max_waitlist;
    section
}

pub fn student(standing: AcademicStanding) -> Student {
    let now = Utc::now();
    Student {
        id: Uuid::new_v4(),
        gpa: 3.2,
        academic_standing: standing,
        created_at: now,
        updated_at: now,
    }
}

/// A context that passes every built-in policy, ready to be bent into the
/// shape a test needs.
pub fn context_for_course(code: &str, credits: u32) -> EnrollmentContext {
    EnrollmentContext {
        course_code: code.to_string(),
        course_prerequisites: Vec::new(),
        course_credits: credits,
        section_schedule: slot(vec![Day::Monday, Day::Wednesday], "10:00", "11:00"),
        section_max_enrollment: 30,
        section_current_enrollment: 0,
        student_completed_courses: Vec::new(),
        student_current_schedule: Vec::new(),
        student_current_credits: 0,
        student_gpa: 3.2,
        student_academic_standing: AcademicStanding::Good,
        max_credits: 18,
    }
}
