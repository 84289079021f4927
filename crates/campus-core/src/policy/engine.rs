use tracing::debug;

use super::builtin::{
    AcademicStandingPolicy, CapacityPolicy, CreditLimitPolicy, PrerequisitePolicy,
    TimeConflictPolicy,
};
use super::{EnrollmentContext, EnrollmentPolicy, PolicyResult};

/// Ordered composition of enrollment policies.
///
/// Evaluation short-circuits: the first denial is returned verbatim, so the
/// surfaced reason always belongs to the earliest failing rule. The default
/// order is cheapest-first and fixed: prerequisite, capacity, time conflict,
/// credit limit, academic standing.
pub struct PolicyEngine {
    policies: Vec<Box<dyn EnrollmentPolicy>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// The standard enrollment rule set in its required order.
    pub fn with_defaults(max_credits: u32) -> Self {
        Self::new()
            .with_policy(Box::new(PrerequisitePolicy))
            .with_policy(Box::new(CapacityPolicy))
            .with_policy(Box::new(TimeConflictPolicy))
            .with_policy(Box::new(CreditLimitPolicy::new(max_credits)))
            .with_policy(Box::new(AcademicStandingPolicy))
    }

    /// Append a policy. Order of registration is order of evaluation.
    pub fn with_policy(mut self, policy: Box<dyn EnrollmentPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn policy_names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Evaluate every policy in order, stopping at the first denial.
    pub fn evaluate(&self, ctx: &EnrollmentContext) -> PolicyResult {
        let mut merged = PolicyResult::allow();

        for policy in &self.policies {
            let result = policy.evaluate(ctx);
            if !result.allowed {
                debug!(
                    policy = policy.name(),
                    rules = ?result.violated_rules,
                    "policy denied enrollment"
                );
                return result;
            }
            // Keep advisory metadata (e.g. probation warnings) from passing rules.
            merged.metadata.extend(result.metadata);
        }

        merged
    }

    /// Evaluate every policy in order without stopping. The orchestrator
    /// needs the full picture: a capacity-only denial routes to the waitlist
    /// rather than rejecting the request outright.
    pub fn evaluate_all(&self, ctx: &EnrollmentContext) -> Vec<PolicyResult> {
        self.policies.iter().map(|p| p.evaluate(ctx)).collect()
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::with_defaults(18)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AcademicStanding;
    use crate::testing::fixtures::context_for_course;

    #[test]
    fn test_default_order_is_fixed() {
        let engine = PolicyEngine::default();
        assert_eq!(
            engine.policy_names(),
            vec![
                "prerequisite",
                "capacity",
                "time_conflict",
                "credit_limit",
                "academic_standing"
            ]
        );
    }

    #[test]
    fn test_first_failure_is_surfaced() {
        // Context violates both prerequisites and capacity; the earlier
        // policy's denial must win.
        let mut ctx = context_for_course("CS-201", 3);
        ctx.course_prerequisites = vec!["CS-101".to_string()];
        ctx.student_completed_courses = vec![];
        ctx.section_current_enrollment = 10;
        ctx.section_max_enrollment = 10;

        let result = PolicyEngine::default().evaluate(&ctx);
        assert!(!result.allowed);
        assert_eq!(
            result.violated_rules,
            vec![super::super::builtin::RULE_PREREQUISITE]
        );
    }

    #[test]
    fn test_all_passing_yields_allow_with_merged_metadata() {
        let mut ctx = context_for_course("CS-101", 3);
        ctx.student_academic_standing = AcademicStanding::Probation;

        let result = PolicyEngine::default().evaluate(&ctx);
        assert!(result.allowed);
        assert!(result.violated_rules.is_empty());
        // Probation warning survives even though the engine allowed.
        assert!(result.metadata.contains_key("warning"));
    }

    #[test]
    fn test_evaluate_all_reports_every_failure() {
        // Full section and an over-credit load: both denials are visible,
        // in evaluation order.
        let mut ctx = context_for_course("CS-201", 10);
        ctx.section_current_enrollment = 10;
        ctx.section_max_enrollment = 10;
        ctx.student_current_credits = 12;

        let results = PolicyEngine::default().evaluate_all(&ctx);
        assert_eq!(results.len(), 5);
        let failed: Vec<&str> = results
            .iter()
            .filter(|r| !r.allowed)
            .flat_map(|r| r.violated_rules.iter().map(String::as_str))
            .collect();
        assert_eq!(failed, vec!["capacity_limit", "credit_limit"]);
    }

    #[test]
    fn test_custom_policy_registration_order() {
        struct AlwaysDeny;
        impl crate::policy::EnrollmentPolicy for AlwaysDeny {
            fn name(&self) -> &'static str {
                "always_deny"
            }
            fn evaluate(&self, _ctx: &EnrollmentContext) -> PolicyResult {
                PolicyResult::deny("always_deny", "configured to deny")
            }
        }

        let engine = PolicyEngine::new()
            .with_policy(Box::new(AlwaysDeny))
            .with_policy(Box::new(super::CapacityPolicy));

        let ctx = context_for_course("CS-101", 3);
        let result = engine.evaluate(&ctx);
        assert_eq!(result.violated_rules, vec!["always_deny"]);
    }
}
