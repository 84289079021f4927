//! Enrollment orchestrator: context gathering, policy evaluation, aggregate
//! mutation, event persistence, read-model projection, audit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::aggregate::EnrollmentAggregate;
use crate::audit::{AuditAction, AuditRecord, AuditStore};
use crate::domain::{Course, Enrollment, EnrollmentError, EnrollmentStatus, Section, Student};
use crate::event_store::{replay, EventStore};
use crate::events::{enrollment_stream_id, EventMetadata};
use crate::locks::LockManager;
use crate::policy::{EnrollmentContext, PolicyEngine, RULE_CAPACITY};
use crate::ports::{ReadModelRepository, SectionCounter};

/// Tunables for the orchestrator, defaults matching the platform config.
#[derive(Debug, Clone)]
pub struct EnrollmentSettings {
    pub max_credits_per_semester: u32,
    /// Fallback waitlist capacity for sections created without one.
    pub default_waitlist_size: u32,
    pub snapshot_every_n_events: i64,
    pub lock_ttl: Duration,
    pub lock_wait_timeout: Duration,
    /// Internal retry budget for recoverable conflicts.
    pub max_retries: u32,
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self {
            max_credits_per_semester: 18,
            default_waitlist_size: 10,
            snapshot_every_n_events: 10,
            lock_ttl: Duration::from_secs(5),
            lock_wait_timeout: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

/// Orchestrates the enrollment pipeline.
///
/// The event streams are authoritative; the read model is updated in the
/// same logical unit but only eventually consistent with the streams. A
/// replayer can reconcile any stale projection by folding the stream back
/// into `upsert_enrollment`.
pub struct EnrollmentService {
    read_model: Arc<dyn ReadModelRepository>,
    event_store: Arc<dyn EventStore>,
    audit: Arc<dyn AuditStore>,
    locks: Arc<LockManager>,
    policies: PolicyEngine,
    settings: EnrollmentSettings,
}

impl EnrollmentService {
    pub fn new(
        read_model: Arc<dyn ReadModelRepository>,
        event_store: Arc<dyn EventStore>,
        audit: Arc<dyn AuditStore>,
        locks: Arc<LockManager>,
        settings: EnrollmentSettings,
    ) -> Self {
        let policies = PolicyEngine::with_defaults(settings.max_credits_per_semester);
        Self {
            read_model,
            event_store,
            audit,
            locks,
            policies,
            settings,
        }
    }

    /// Replace the policy set (order of registration is order of evaluation).
    pub fn with_policy_engine(mut self, policies: PolicyEngine) -> Self {
        self.policies = policies;
        self
    }

    /// Enroll a student into a section, or place them on the waitlist.
    ///
    /// Recoverable failures (version conflicts, lock timeouts) are retried
    /// internally with jittered backoff before being surfaced.
    #[instrument(skip(self))]
    pub async fn enroll(
        &self,
        student_id: Uuid,
        section_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Enrollment, EnrollmentError> {
        self.with_retries(|| self.enroll_once(student_id, section_id, actor_id))
            .await
    }

    /// Drop an enrollment. Dropping an enrolled student promotes the head of
    /// the waitlist and renumbers the remainder.
    #[instrument(skip(self))]
    pub async fn drop(
        &self,
        enrollment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Enrollment, EnrollmentError> {
        self.with_retries(|| self.drop_once(enrollment_id, actor_id))
            .await
    }

    /// Mark an enrolled student's enrollment completed, feeding the
    /// completed-courses projection. Counters are untouched: completion
    /// happens at end of term, not mid-registration.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        enrollment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Enrollment, EnrollmentError> {
        self.with_retries(|| self.complete_once(enrollment_id, actor_id))
            .await
    }

    pub async fn list_enrollments(
        &self,
        student_id: Uuid,
        semester: Option<&str>,
    ) -> Result<Vec<Enrollment>, EnrollmentError> {
        Ok(self
            .read_model
            .list_enrollments(student_id, semester.map(str::to_string))
            .await?)
    }

    // ------------------------------------------------------------------
    // Single attempts
    // ------------------------------------------------------------------

    async fn enroll_once(
        &self,
        student_id: Uuid,
        section_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Enrollment, EnrollmentError> {
        let (section, course, student) = self.load_targets(student_id, section_id).await?;

        if self
            .read_model
            .find_active_enrollment(student_id, section_id)
            .await?
            .is_some()
        {
            return Err(EnrollmentError::AlreadyEnrolled);
        }

        let context = self.build_context(&student, &section, &course).await?;

        // Capacity is the one rule the orchestrator owns the remedy for: a
        // section that merely looks full routes to the waitlist decision
        // below. Any other violation is terminal, surfacing the earliest
        // failing rule.
        let results = self.policies.evaluate_all(&context);
        let capacity_only = results
            .iter()
            .filter(|r| !r.allowed)
            .all(|r| r.violated_rules == [RULE_CAPACITY.to_string()]);
        if let Some(verdict) = results.into_iter().find(|r| !r.allowed) {
            if !capacity_only {
                debug!(rules = ?verdict.violated_rules, "enrollment denied by policy");
                return Err(EnrollmentError::PolicyDenied {
                    reason: verdict
                        .reason
                        .unwrap_or_else(|| "enrollment policy violation".to_string()),
                    violated_rules: verdict.violated_rules,
                });
            }
        }

        // Seat accounting races with other writers on the same section;
        // hold the section lease across decide + persist + counter update.
        let _lease = self.acquire_section_lease(section_id).await?;

        // Rows and counters may have moved while we waited for the lease.
        // A concurrent request for the same (student, section) could have
        // landed first; re-check before deciding.
        if self
            .read_model
            .find_active_enrollment(student_id, section_id)
            .await?
            .is_some()
        {
            return Err(EnrollmentError::AlreadyEnrolled);
        }
        let section = self
            .read_model
            .get_section(section_id)
            .await?
            .ok_or_else(|| EnrollmentError::NotFound(format!("section {}", section_id)))?;

        let enrollment_id = Uuid::new_v4();
        let mut aggregate = EnrollmentAggregate::new(enrollment_id);
        let now = Utc::now();

        let max_waitlist = if section.max_waitlist > 0 {
            section.max_waitlist
        } else {
            self.settings.default_waitlist_size
        };

        let counter = if section.has_open_seat() {
            aggregate.enroll(student_id, section_id, &course.course_code, now)?;
            SectionCounter::CurrentEnrollment
        } else if section.waitlist_size < max_waitlist {
            let position = section.waitlist_size + 1;
            aggregate.waitlist(student_id, section_id, &course.course_code, position, now)?;
            SectionCounter::WaitlistSize
        } else {
            return Err(EnrollmentError::SectionFull);
        };

        self.persist_events(&mut aggregate, actor_id).await?;
        self.maybe_snapshot(&aggregate).await?;

        let enrollment = Enrollment {
            id: enrollment_id,
            student_id,
            section_id,
            status: aggregate.status().unwrap_or(EnrollmentStatus::Enrolled),
            waitlist_position: aggregate.state().waitlist_position,
            enrolled_at: now,
            version: aggregate.version(),
        };
        self.read_model.upsert_enrollment(&enrollment).await?;
        self.read_model
            .increment_section_counter(section_id, counter, 1)
            .await?;

        let action = match enrollment.status {
            EnrollmentStatus::Waitlisted => AuditAction::Waitlist,
            _ => AuditAction::Enroll,
        };
        self.record_audit(
            AuditRecord::new(action, "enrollment")
                .resource(enrollment_id)
                .actor(actor_id)
                .meta("student_id", json!(student_id))
                .meta("section_id", json!(section_id))
                .meta("status", json!(enrollment.status.as_str()))
                .meta("waitlist_position", json!(enrollment.waitlist_position)),
        )
        .await?;

        info!(
            %enrollment_id,
            status = enrollment.status.as_str(),
            "enrollment persisted"
        );
        Ok(enrollment)
    }

    async fn drop_once(
        &self,
        enrollment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Enrollment, EnrollmentError> {
        let row = self
            .read_model
            .get_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| EnrollmentError::NotFound(format!("enrollment {}", enrollment_id)))?;
        let section_id = row.section_id;

        let _lease = self.acquire_section_lease(section_id).await?;

        let mut aggregate = replay(self.event_store.as_ref(), enrollment_id).await?;
        let previous_status = aggregate.status();
        let dropped_position = aggregate.state().waitlist_position;
        aggregate.drop_enrollment(Utc::now())?;
        self.persist_events(&mut aggregate, actor_id).await?;
        self.maybe_snapshot(&aggregate).await?;

        let dropped = Enrollment {
            status: EnrollmentStatus::Dropped,
            waitlist_position: None,
            version: aggregate.version(),
            ..row
        };
        self.read_model.upsert_enrollment(&dropped).await?;

        self.record_audit(
            AuditRecord::new(AuditAction::Drop, "enrollment")
                .resource(enrollment_id)
                .actor(actor_id)
                .meta("student_id", json!(dropped.student_id))
                .meta("section_id", json!(section_id)),
        )
        .await?;

        match previous_status {
            Some(EnrollmentStatus::Enrolled) => {
                self.read_model
                    .increment_section_counter(
                        section_id,
                        SectionCounter::CurrentEnrollment,
                        -1,
                    )
                    .await?;
                self.promote_waitlist_head(section_id, actor_id).await?;
            }
            Some(EnrollmentStatus::Waitlisted) => {
                self.read_model
                    .increment_section_counter(section_id, SectionCounter::WaitlistSize, -1)
                    .await?;
                self.renumber_waitlist_after(section_id, dropped_position.unwrap_or(0))
                    .await?;
            }
            _ => {}
        }

        info!(%enrollment_id, "enrollment dropped");
        Ok(dropped)
    }

    async fn complete_once(
        &self,
        enrollment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Enrollment, EnrollmentError> {
        let row = self
            .read_model
            .get_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| EnrollmentError::NotFound(format!("enrollment {}", enrollment_id)))?;

        let mut aggregate = replay(self.event_store.as_ref(), enrollment_id).await?;
        aggregate.complete(Utc::now())?;
        self.persist_events(&mut aggregate, actor_id).await?;
        self.maybe_snapshot(&aggregate).await?;

        let completed = Enrollment {
            status: EnrollmentStatus::Completed,
            waitlist_position: None,
            version: aggregate.version(),
            ..row
        };
        self.read_model.upsert_enrollment(&completed).await?;

        self.record_audit(
            AuditRecord::new(AuditAction::Complete, "enrollment")
                .resource(enrollment_id)
                .actor(actor_id)
                .meta("student_id", json!(completed.student_id))
                .meta("section_id", json!(completed.section_id)),
        )
        .await?;

        Ok(completed)
    }

    // ------------------------------------------------------------------
    // Pipeline pieces
    // ------------------------------------------------------------------

    async fn load_targets(
        &self,
        student_id: Uuid,
        section_id: Uuid,
    ) -> Result<(Section, Course, Student), EnrollmentError> {
        let section = self
            .read_model
            .get_section(section_id)
            .await?
            .ok_or_else(|| EnrollmentError::NotFound(format!("section {}", section_id)))?;
        let course = self
            .read_model
            .get_course(section.course_id)
            .await?
            .ok_or_else(|| EnrollmentError::NotFound(format!("course {}", section.course_id)))?;
        let student = self
            .read_model
            .get_student(student_id)
            .await?
            .ok_or_else(|| EnrollmentError::NotFound(format!("student {}", student_id)))?;
        Ok((section, course, student))
    }

    async fn build_context(
        &self,
        student: &Student,
        section: &Section,
        course: &Course,
    ) -> Result<EnrollmentContext, EnrollmentError> {
        let completed = self.read_model.get_completed_courses(student.id).await?;
        let schedule = self
            .read_model
            .get_current_schedule(student.id, &section.semester)
            .await?;
        let credits = self
            .read_model
            .get_current_credits(student.id, &section.semester)
            .await?;

        Ok(EnrollmentContext {
            course_code: course.course_code.clone(),
            course_prerequisites: course.prerequisites.clone(),
            course_credits: course.credits,
            section_schedule: section.schedule.clone(),
            section_max_enrollment: section.max_enrollment,
            section_current_enrollment: section.current_enrollment,
            student_completed_courses: completed,
            student_current_schedule: schedule,
            student_current_credits: credits,
            student_gpa: student.gpa,
            student_academic_standing: student.academic_standing,
            max_credits: self.settings.max_credits_per_semester,
        })
    }

    async fn acquire_section_lease(
        &self,
        section_id: Uuid,
    ) -> Result<crate::locks::Lease, EnrollmentError> {
        let resource = format!("section:{}", section_id);
        // Owner is per-request: two requests from one actor must still
        // exclude each other.
        let owner = Uuid::new_v4().to_string();
        self.locks
            .acquire(
                &resource,
                &owner,
                self.settings.lock_ttl,
                self.settings.lock_wait_timeout,
            )
            .await
            .ok_or(EnrollmentError::LockTimeout { resource })
    }

    /// Append the aggregate's uncommitted events, fencing each append on the
    /// version the event was raised at.
    async fn persist_events(
        &self,
        aggregate: &mut EnrollmentAggregate,
        actor_id: Uuid,
    ) -> Result<(), EnrollmentError> {
        let stream_id = enrollment_stream_id(aggregate.id());
        let mut expected = aggregate.committed_version();
        for event in aggregate.uncommitted_events() {
            self.event_store
                .append(
                    &stream_id,
                    Some(expected),
                    event.clone(),
                    EventMetadata::for_actor(actor_id),
                )
                .await?;
            expected += 1;
        }
        aggregate.mark_committed();
        Ok(())
    }

    async fn maybe_snapshot(
        &self,
        aggregate: &EnrollmentAggregate,
    ) -> Result<(), EnrollmentError> {
        let every = self.settings.snapshot_every_n_events.max(1);
        if aggregate.version() > 0 && aggregate.version() % every == 0 {
            self.event_store.save_snapshot(aggregate.snapshot()?).await?;
            debug!(aggregate_id = %aggregate.id(), version = aggregate.version(), "snapshot saved");
        }
        Ok(())
    }

    /// Promote the position-1 waitlisted enrollment after a seat opened.
    async fn promote_waitlist_head(
        &self,
        section_id: Uuid,
        actor_id: Uuid,
    ) -> Result<(), EnrollmentError> {
        let waitlist = self.read_model.list_waitlisted(section_id).await?;
        let Some(head) = waitlist.first().cloned() else {
            return Ok(());
        };

        let mut aggregate = replay(self.event_store.as_ref(), head.id).await?;
        aggregate.promote(Utc::now())?;
        self.persist_events(&mut aggregate, actor_id).await?;
        self.maybe_snapshot(&aggregate).await?;

        let promoted = Enrollment {
            status: EnrollmentStatus::Enrolled,
            waitlist_position: None,
            version: aggregate.version(),
            ..head.clone()
        };
        self.read_model.upsert_enrollment(&promoted).await?;
        self.read_model
            .increment_section_counter(section_id, SectionCounter::CurrentEnrollment, 1)
            .await?;
        self.read_model
            .increment_section_counter(section_id, SectionCounter::WaitlistSize, -1)
            .await?;

        // Everyone behind the promoted student moves up one place.
        self.renumber_waitlist_after(section_id, head.waitlist_position.unwrap_or(1))
            .await?;

        self.record_audit(
            AuditRecord::new(AuditAction::Promote, "enrollment")
                .resource(head.id)
                .actor(actor_id)
                .meta("student_id", json!(head.student_id))
                .meta("section_id", json!(section_id)),
        )
        .await?;

        info!(enrollment_id = %head.id, %section_id, "waitlisted student promoted");
        Ok(())
    }

    /// Shift waitlist positions greater than `vacated` down by one. This is
    /// a projection-only adjustment: positions live in the read model, not
    /// in the streams.
    async fn renumber_waitlist_after(
        &self,
        section_id: Uuid,
        vacated: u32,
    ) -> Result<(), EnrollmentError> {
        let waitlist = self.read_model.list_waitlisted(section_id).await?;
        for entry in waitlist {
            if let Some(position) = entry.waitlist_position {
                if position > vacated {
                    let shifted = Enrollment {
                        waitlist_position: Some(position - 1),
                        ..entry
                    };
                    self.read_model.upsert_enrollment(&shifted).await?;
                }
            }
        }
        Ok(())
    }

    /// Audit append failure is fatal for the enclosing operation: the
    /// outcome must not be acknowledged without its trail entry.
    async fn record_audit(&self, record: AuditRecord) -> Result<(), EnrollmentError> {
        self.audit.append(record).await.map(|_| ()).map_err(|err| {
            error!(error = %err, "audit append failed; refusing to acknowledge operation");
            EnrollmentError::from(err)
        })
    }

    // ------------------------------------------------------------------
    // Retry plumbing
    // ------------------------------------------------------------------

    async fn with_retries<F, Fut>(&self, mut attempt: F) -> Result<Enrollment, EnrollmentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Enrollment, EnrollmentError>>,
    {
        let mut tries = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() && tries < self.settings.max_retries => {
                    tries += 1;
                    warn!(error = %err, tries, "recoverable conflict, retrying");
                    Self::backoff(tries).await;
                }
                other => return other,
            }
        }
    }

    async fn backoff(attempt: u32) {
        let base = 20u64 << attempt.min(6);
        let jitter = rand::thread_rng().gen_range(0..base / 2 + 1);
        tokio::time::sleep(Duration::from_millis(base + jitter)).await;
    }
}
