use campus_core::domain::{AcademicStanding, Day, Enrollment, EnrollmentStatus};
use campus_core::ports::{ReadModelRepository, SectionCounter};
use campus_core::testing::fixtures;
use campus_storage::{init_registry_db, SqliteReadModel};
use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

async fn read_model() -> (TempDir, SqliteReadModel) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("registry.db");
    let pool = init_registry_db(path.to_str().unwrap()).await.unwrap();
    (dir, SqliteReadModel::new(pool))
}

fn enrollment_row(student_id: Uuid, section_id: Uuid, status: EnrollmentStatus) -> Enrollment {
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
async fn test_course_and_section_round_trip() {
    let (_dir, rm) = read_model().await;

    let course = fixtures::course("CS-201", 4, vec!["CS-101", "MATH-100"]);
    rm.upsert_course(&course).await.unwrap();

    let section = fixtures::section_for(
        &course,
        fixtures::slot(vec![Day::Monday, Day::Wednesday], "10:00", "11:30"),
        25,
    );
    rm.upsert_section(&section).await.unwrap();

    let loaded = rm.get_course(course.id).await.unwrap().unwrap();
    assert_eq!(loaded.course_code, "CS-201");
    assert_eq!(loaded.credits, 4);
    assert_eq!(loaded.prerequisites, vec!["CS-101", "MATH-100"]);

    let by_code = rm.get_course_by_code("CS-201").await.unwrap().unwrap();
    assert_eq!(by_code.id, course.id);

    let loaded = rm.get_section(section.id).await.unwrap().unwrap();
    assert_eq!(loaded.semester, fixtures::SEMESTER);
    assert_eq!(loaded.schedule, section.schedule);
    assert_eq!(loaded.max_enrollment, 25);
    assert_eq!(loaded.add_drop_deadline, section.add_drop_deadline);

    assert!(rm.get_section(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_student_round_trip() {
    let (_dir, rm) = read_model().await;

    let student = fixtures::student(AcademicStanding::Probation);
    rm.upsert_student(&student).await.unwrap();

    let loaded = rm.get_student(student.id).await.unwrap().unwrap();
    assert_eq!(loaded.academic_standing, AcademicStanding::Probation);
    assert!((loaded.gpa - student.gpa).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_section_counters_move_by_delta() {
    let (_dir, rm) = read_model().await;

    let course = fixtures::course("CS-101", 3, vec![]);
    rm.upsert_course(&course).await.unwrap();
    let section = fixtures::section_for(
        &course,
        fixtures::slot(vec![Day::Friday], "09:00", "10:00"),
        30,
    );
    rm.upsert_section(&section).await.unwrap();

    rm.increment_section_counter(section.id, SectionCounter::CurrentEnrollment, 1)
        .await
        .unwrap();
    rm.increment_section_counter(section.id, SectionCounter::WaitlistSize, 1)
        .await
        .unwrap();
    rm.increment_section_counter(section.id, SectionCounter::WaitlistSize, -1)
        .await
        .unwrap();

    let loaded = rm.get_section(section.id).await.unwrap().unwrap();
    assert_eq!(loaded.current_enrollment, 1);
    assert_eq!(loaded.waitlist_size, 0);

    assert!(rm
        .increment_section_counter(Uuid::new_v4(), SectionCounter::WaitlistSize, 1)
        .await
        .is_err());
}

#[tokio::test]
async fn test_active_enrollment_lookup_and_uniqueness_scope() {
    let (_dir, rm) = read_model().await;

    let course = fixtures::course("CS-101", 3, vec![]);
    rm.upsert_course(&course).await.unwrap();
    let section = fixtures::section_for(
        &course,
        fixtures::slot(vec![Day::Monday], "10:00", "11:00"),
        30,
    );
    rm.upsert_section(&section).await.unwrap();

    let student = Uuid::new_v4();
    let mut row = enrollment_row(student, section.id, EnrollmentStatus::Enrolled);
    rm.upsert_enrollment(&row).await.unwrap();

    assert!(rm
        .find_active_enrollment(student, section.id)
        .await
        .unwrap()
        .is_some());

    // Dropped rows no longer count as active.
    row.status = EnrollmentStatus::Dropped;
    rm.upsert_enrollment(&row).await.unwrap();
    assert!(rm
        .find_active_enrollment(student, section.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_second_active_row_is_rejected_as_already_enrolled() {
    let (_dir, rm) = read_model().await;

    let course = fixtures::course("CS-101", 3, vec![]);
    rm.upsert_course(&course).await.unwrap();
    let section = fixtures::section_for(
        &course,
        fixtures::slot(vec![Day::Monday], "10:00", "11:00"),
        30,
    );
    rm.upsert_section(&section).await.unwrap();

    let student = Uuid::new_v4();
    let mut first = enrollment_row(student, section.id, EnrollmentStatus::Enrolled);
    rm.upsert_enrollment(&first).await.unwrap();

    // A distinct row for the same (student, section) trips the active
    // uniqueness index and surfaces as the domain error.
    let mut second = enrollment_row(student, section.id, EnrollmentStatus::Waitlisted);
    second.waitlist_position = Some(1);
    let err = rm.upsert_enrollment(&second).await.unwrap_err();
    assert!(matches!(
        campus_core::EnrollmentError::from(err),
        campus_core::EnrollmentError::AlreadyEnrolled
    ));

    // Once the first row leaves the active set, a fresh active row is fine.
    first.status = EnrollmentStatus::Dropped;
    rm.upsert_enrollment(&first).await.unwrap();
    rm.upsert_enrollment(&second).await.unwrap();
}

#[tokio::test]
async fn test_completed_courses_schedule_and_credits_projections() {
    let (_dir, rm) = read_model().await;

    let cs101 = fixtures::course("CS-101", 3, vec![]);
    let cs201 = fixtures::course("CS-201", 4, vec![]);
    rm.upsert_course(&cs101).await.unwrap();
    rm.upsert_course(&cs201).await.unwrap();

    let done = fixtures::section_for(
        &cs101,
        fixtures::slot(vec![Day::Monday], "09:00", "10:00"),
        30,
    );
    let active = fixtures::section_for(
        &cs201,
        fixtures::slot(vec![Day::Tuesday, Day::Thursday], "13:00", "14:30"),
        30,
    );
    rm.upsert_section(&done).await.unwrap();
    rm.upsert_section(&active).await.unwrap();

    let student = Uuid::new_v4();
    rm.upsert_enrollment(&enrollment_row(student, done.id, EnrollmentStatus::Completed))
        .await
        .unwrap();
    rm.upsert_enrollment(&enrollment_row(student, active.id, EnrollmentStatus::Enrolled))
        .await
        .unwrap();

    let completed = rm.get_completed_courses(student).await.unwrap();
    assert_eq!(completed, vec!["CS-101".to_string()]);

    let schedule = rm
        .get_current_schedule(student, fixtures::SEMESTER)
        .await
        .unwrap();
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].course_code, "CS-201");
    assert_eq!(schedule[0].slot, active.schedule);

    let credits = rm
        .get_current_credits(student, fixtures::SEMESTER)
        .await
        .unwrap();
    assert_eq!(credits, 4);

    // A different semester sees neither schedule nor credits.
    assert!(rm
        .get_current_schedule(student, "1999-spring")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        rm.get_current_credits(student, "1999-spring").await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_waitlist_listing_is_position_ordered() {
    let (_dir, rm) = read_model().await;

    let course = fixtures::course("CS-101", 3, vec![]);
    rm.upsert_course(&course).await.unwrap();
    let section = fixtures::section_for(
        &course,
        fixtures::slot(vec![Day::Monday], "10:00", "11:00"),
        1,
    );
    rm.upsert_section(&section).await.unwrap();

    // Insert out of order; listing must come back 1, 2, 3.
    for position in [3u32, 1, 2] {
        let mut row = enrollment_row(Uuid::new_v4(), section.id, EnrollmentStatus::Waitlisted);
        row.waitlist_position = Some(position);
        rm.upsert_enrollment(&row).await.unwrap();
    }

    let waitlist = rm.list_waitlisted(section.id).await.unwrap();
    let positions: Vec<u32> = waitlist
        .iter()
        .map(|e| e.waitlist_position.unwrap())
        .collect();
    assert_eq!(positions, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_list_enrollments_semester_filter() {
    let (_dir, rm) = read_model().await;

    let course = fixtures::course("CS-101", 3, vec![]);
    rm.upsert_course(&course).await.unwrap();
    let mut fall = fixtures::section_for(
        &course,
        fixtures::slot(vec![Day::Monday], "10:00", "11:00"),
        30,
    );
    fall.semester = "2025-fall".to_string();
    let mut spring = fixtures::section_for(
        &course,
        fixtures::slot(vec![Day::Tuesday], "10:00", "11:00"),
        30,
    );
    spring.semester = "2026-spring".to_string();
    rm.upsert_section(&fall).await.unwrap();
    rm.upsert_section(&spring).await.unwrap();

    let student = Uuid::new_v4();
    rm.upsert_enrollment(&enrollment_row(student, fall.id, EnrollmentStatus::Enrolled))
        .await
        .unwrap();
    rm.upsert_enrollment(&enrollment_row(student, spring.id, EnrollmentStatus::Enrolled))
        .await
        .unwrap();

    assert_eq!(rm.list_enrollments(student, None).await.unwrap().len(), 2);
    assert_eq!(
        rm.list_enrollments(student, Some("2025-fall".to_string()))
            .await
            .unwrap()
            .len(),
        1
    );
}
