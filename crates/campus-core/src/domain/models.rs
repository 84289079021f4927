use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ScheduleParseError;

// Days of the week a section can meet on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub fn as_str(&self) -> &'static str {
        match self {
            Day::Monday => "monday",
            Day::Tuesday => "tuesday",
            Day::Wednesday => "wednesday",
            Day::Thursday => "thursday",
            Day::Friday => "friday",
            Day::Saturday => "saturday",
            Day::Sunday => "sunday",
        }
    }
}

impl std::fmt::Display for Day {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Day {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monday" | "mon" => Ok(Day::Monday),
            "tuesday" | "tue" => Ok(Day::Tuesday),
            "wednesday" | "wed" => Ok(Day::Wednesday),
            "thursday" | "thu" => Ok(Day::Thursday),
            "friday" | "fri" => Ok(Day::Friday),
            "saturday" | "sat" => Ok(Day::Saturday),
            "sunday" | "sun" => Ok(Day::Sunday),
            _ => Err(ScheduleParseError::InvalidDay(s.to_string())),
        }
    }
}

/// Minute-precision time of day, stored as minutes since midnight.
///
/// Callers normalize to local semester time before constructing; this layer
/// has no timezone awareness.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TimeOfDay(pub u16);

impl TimeOfDay {
    pub const MINUTES_PER_DAY: u16 = 24 * 60;

    pub fn new(hour: u16, minute: u16) -> Result<Self, ScheduleParseError> {
        if hour >= 24 || minute >= 60 {
            return Err(ScheduleParseError::InvalidTime(format!(
                "{:02}:{:02}",
                hour, minute
            )));
        }
        Ok(Self(hour * 60 + minute))
    }

    /// Parse a strict `HH:MM` 24-hour string.
    pub fn parse(s: &str) -> Result<Self, ScheduleParseError> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| ScheduleParseError::InvalidTime(s.to_string()))?;
        if h.len() != 2 || m.len() != 2 {
            return Err(ScheduleParseError::InvalidTime(s.to_string()));
        }
        let hour: u16 = h
            .parse()
            .map_err(|_| ScheduleParseError::InvalidTime(s.to_string()))?;
        let minute: u16 = m
            .parse()
            .map_err(|_| ScheduleParseError::InvalidTime(s.to_string()))?;
        Self::new(hour, minute)
    }

    pub fn hour(&self) -> u16 {
        self.0 / 60
    }

    pub fn minute(&self) -> u16 {
        self.0 % 60
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// A weekly meeting pattern: a set of days plus a half-open time interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub days: Vec<Day>,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl ScheduleSlot {
    pub fn new(days: Vec<Day>, start: TimeOfDay, end: TimeOfDay) -> Result<Self, ScheduleParseError> {
        if start >= end {
            return Err(ScheduleParseError::EmptyInterval {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { days, start, end })
    }

    /// Two slots conflict iff their day sets intersect and the time
    /// intervals `[start, end)` overlap on the shared day.
    pub fn overlaps(&self, other: &ScheduleSlot) -> bool {
        let shares_day = self.days.iter().any(|d| other.days.contains(d));
        shares_day && self.start < other.end && other.start < self.end
    }
}

// Course catalog entry. Immutable after creation except for metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub course_code: String,
    pub title: String,
    pub credits: u32,
    pub level: String,
    pub department: String,
    pub prerequisites: Vec<String>,
    pub corequisites: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A scheduled offering of a course for one semester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: Uuid,
    pub course_id: Uuid,
    pub section_number: String,
    pub semester: String,
    pub instructor_id: Uuid,
    pub schedule: ScheduleSlot,
    pub room_id: Option<Uuid>,
    pub max_enrollment: u32,
    pub current_enrollment: u32,
    pub waitlist_size: u32,
    pub max_waitlist: u32,
    pub add_drop_deadline: NaiveDate,
    pub withdrawal_deadline: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Section {
    /// Check the structural section invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.current_enrollment > self.max_enrollment {
            return Err(format!(
                "current_enrollment {} exceeds max_enrollment {}",
                self.current_enrollment, self.max_enrollment
            ));
        }
        if self.waitlist_size > self.max_waitlist {
            return Err(format!(
                "waitlist_size {} exceeds max_waitlist {}",
                self.waitlist_size, self.max_waitlist
            ));
        }
        if self.schedule.start >= self.schedule.end {
            return Err(format!(
                "start_time {} is not before end_time {}",
                self.schedule.start, self.schedule.end
            ));
        }
        if self.add_drop_deadline > self.withdrawal_deadline {
            return Err(format!(
                "add_drop_deadline {} is after withdrawal_deadline {}",
                self.add_drop_deadline, self.withdrawal_deadline
            ));
        }
        Ok(())
    }

    pub fn has_open_seat(&self) -> bool {
        self.current_enrollment < self.max_enrollment
    }

    pub fn has_waitlist_room(&self) -> bool {
        self.waitlist_size < self.max_waitlist
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcademicStanding {
    Good,
    Warning,
    Probation,
    Suspended,
}

impl AcademicStanding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcademicStanding::Good => "good",
            AcademicStanding::Warning => "warning",
            AcademicStanding::Probation => "probation",
            AcademicStanding::Suspended => "suspended",
        }
    }
}

impl std::fmt::Display for AcademicStanding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AcademicStanding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "good" => Ok(AcademicStanding::Good),
            "warning" => Ok(AcademicStanding::Warning),
            "probation" => Ok(AcademicStanding::Probation),
            "suspended" => Ok(AcademicStanding::Suspended),
            _ => Err(format!("Unknown academic standing: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub gpa: f64,
    pub academic_standing: AcademicStanding,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Enrolled,
    Waitlisted,
    Dropped,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Enrolled => "enrolled",
            EnrollmentStatus::Waitlisted => "waitlisted",
            EnrollmentStatus::Dropped => "dropped",
            EnrollmentStatus::Completed => "completed",
        }
    }

    /// Active enrollments occupy a seat or a waitlist slot.
    pub fn is_active(&self) -> bool {
        matches!(self, EnrollmentStatus::Enrolled | EnrollmentStatus::Waitlisted)
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enrolled" => Ok(EnrollmentStatus::Enrolled),
            "waitlisted" => Ok(EnrollmentStatus::Waitlisted),
            "dropped" => Ok(EnrollmentStatus::Dropped),
            "completed" => Ok(EnrollmentStatus::Completed),
            _ => Err(format!("Unknown enrollment status: {}", s)),
        }
    }
}

/// Read-model projection of one enrollment aggregate.
///
/// At most one row with an active status may exist per (student, section);
/// `version` is the count of events applied to the underlying stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub section_id: Uuid,
    pub status: EnrollmentStatus,
    pub waitlist_position: Option<u32>,
    pub enrolled_at: DateTime<Utc>,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_time_of_day_parse_valid() {
        let t = TimeOfDay::parse("09:30").unwrap();
        assert_eq!(t.hour(), 9);
        assert_eq!(t.minute(), 30);
        assert_eq!(t.to_string(), "09:30");
    }

    #[rstest]
    #[case("9:30")]
    #[case("24:00")]
    #[case("10:60")]
    #[case("1030")]
    #[case("")]
    fn test_time_of_day_parse_rejects_malformed(#[case] input: &str) {
        assert!(TimeOfDay::parse(input).is_err());
    }

    #[test]
    fn test_schedule_slot_rejects_empty_interval() {
        let t = TimeOfDay::parse("10:00").unwrap();
        assert!(ScheduleSlot::new(vec![Day::Monday], t, t).is_err());
    }

    #[test]
    fn test_overlap_requires_shared_day() {
        let a = ScheduleSlot::new(
            vec![Day::Monday, Day::Wednesday],
            TimeOfDay::parse("10:00").unwrap(),
            TimeOfDay::parse("11:00").unwrap(),
        )
        .unwrap();
        let b = ScheduleSlot::new(
            vec![Day::Tuesday, Day::Thursday],
            TimeOfDay::parse("10:00").unwrap(),
            TimeOfDay::parse("11:00").unwrap(),
        )
        .unwrap();
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_overlap_detects_partial_intersection() {
        let a = ScheduleSlot::new(
            vec![Day::Monday, Day::Wednesday],
            TimeOfDay::parse("10:00").unwrap(),
            TimeOfDay::parse("11:00").unwrap(),
        )
        .unwrap();
        let b = ScheduleSlot::new(
            vec![Day::Monday],
            TimeOfDay::parse("10:30").unwrap(),
            TimeOfDay::parse("12:00").unwrap(),
        )
        .unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn test_overlap_half_open_intervals_touching_do_not_conflict() {
        // [09:00, 10:00) and [10:00, 11:00) share a boundary but no minute
        let a = ScheduleSlot::new(
            vec![Day::Friday],
            TimeOfDay::parse("09:00").unwrap(),
            TimeOfDay::parse("10:00").unwrap(),
        )
        .unwrap();
        let b = ScheduleSlot::new(
            vec![Day::Friday],
            TimeOfDay::parse("10:00").unwrap(),
            TimeOfDay::parse("11:00").unwrap(),
        )
        .unwrap();
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn test_section_validate_capacity_bounds() {
        let mut section = crate::testing::fixtures::section_with_capacity(30, 10);
        assert!(section.validate().is_ok());

        section.current_enrollment = 31;
        assert!(section.validate().is_err());
    }

    #[test]
    fn test_enrollment_status_active() {
        assert!(EnrollmentStatus::Enrolled.is_active());
        assert!(EnrollmentStatus::Waitlisted.is_active());
        assert!(!EnrollmentStatus::Dropped.is_active());
        assert!(!EnrollmentStatus::Completed.is_active());
    }

    #[test]
    fn test_day_round_trip() {
        for day in [
            Day::Monday,
            Day::Tuesday,
            Day::Wednesday,
            Day::Thursday,
            Day::Friday,
            Day::Saturday,
            Day::Sunday,
        ] {
            let parsed: Day = day.as_str().parse().unwrap();
            assert_eq!(parsed, day);
        }
        assert!("funday".parse::<Day>().is_err());
    }
}
