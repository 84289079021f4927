pub mod error;
pub mod models;

pub use error::{EnrollmentError, ScheduleParseError};
pub use models::{
    AcademicStanding, Course, Day, Enrollment, EnrollmentStatus, ScheduleSlot, Section, Student,
    TimeOfDay,
};
