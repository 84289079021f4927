use thiserror::Error;

use crate::invariants::InvariantViolationType;

#[derive(Debug, Error)]
pub enum ScheduleParseError {
    #[error("Invalid time of day: {0} (expected HH:MM, 24-hour)")]
    InvalidTime(String),

    #[error("Invalid day of week: {0}")]
    InvalidDay(String),

    #[error("Schedule interval is empty: start {start} is not before end {end}")]
    EmptyInterval { start: String, end: String },
}

/// Errors surfaced by the enrollment orchestrator.
///
/// `Concurrency` and `LockTimeout` are retried internally before being
/// surfaced; policy denials are terminal for the request.
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Student already has an active enrollment in this section")]
    AlreadyEnrolled,

    #[error("Enrollment denied: {reason}")]
    PolicyDenied {
        reason: String,
        violated_rules: Vec<String>,
    },

    #[error("Section and waitlist are both full")]
    SectionFull,

    #[error("Version conflict: expected {expected}, actual {actual}")]
    Concurrency { expected: i64, actual: i64 },

    #[error("Could not acquire lock on {resource} within the wait timeout")]
    LockTimeout { resource: String },

    #[error("Audit chain append failed: {0}")]
    AuditFailure(String),

    #[error("Enrollment invariant violated: {0:?}")]
    InvariantViolation(InvariantViolationType),

    #[error("Invalid enrollment transition: cannot {action} from {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("Repository error: {0}")]
    Repository(anyhow::Error),
}

/// Repository ports speak `anyhow`; a backend that detected a domain
/// condition (e.g. the active-enrollment uniqueness guard) reports it by
/// wrapping the domain error, which is unwrapped here instead of being
/// buried as a generic repository failure.
impl From<anyhow::Error> for EnrollmentError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<EnrollmentError>() {
            Ok(domain) => domain,
            Err(err) => EnrollmentError::Repository(err),
        }
    }
}

impl EnrollmentError {
    /// Whether the caller may retry the operation after refetching state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EnrollmentError::Concurrency { .. } | EnrollmentError::LockTimeout { .. }
        )
    }
}
