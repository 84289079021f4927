//! Campus enrollment core: policy-driven, event-sourced enrollment with
//! optimistic concurrency and a tamper-evident audit trail.

pub mod aggregate;
pub mod audit;
pub mod domain;
pub mod event_store;
pub mod events;
pub mod invariants;
pub mod locks;
pub mod policy;
pub mod ports;
pub mod services;
pub mod testing;

// Re-export commonly used types
pub use domain::{
    AcademicStanding,
    Course,
    Day,
    Enrollment,
    EnrollmentError,
    EnrollmentStatus,
    ScheduleSlot,
    Section,
    Student,
    TimeOfDay,
};

pub use aggregate::{EnrollmentAggregate, EnrollmentState};
pub use audit::{
    verify_entries, AuditAction, AuditEntry, AuditError, AuditRecord, AuditStore, MemoryAuditLog,
};
pub use event_store::{replay, EventStore, EventStoreError, MemoryEventStore};
pub use events::{
    enrollment_stream_id, EnrollmentEvent, EventEnvelope, EventMetadata, Snapshot,
};
pub use invariants::{
    InvariantCheck, InvariantMonitor, InvariantViolation, InvariantViolationType,
    SectionOccupancy,
};
pub use locks::{Lease, LockManager};
pub use policy::{
    EnrollmentContext, EnrollmentPolicy, PolicyEngine, PolicyResult, ScheduledSection,
};
pub use ports::{ReadModelRepository, SectionCounter};
pub use services::{EnrollmentService, EnrollmentSettings};
