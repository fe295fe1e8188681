//! Policy evaluation engine.
//!
//! Decides whether a user may see a document. Rules are evaluated in
//! declaration order; the first rule whose `match` gate, identity gate and
//! conditions all pass allows. When none does, the policy default applies.
//!
//! # Example
//!
//! ```ignore
//! use ragguard_policy::{Policy, PolicyEngine, PolicyLimits};
//!
//! let policy = Policy::from_json(policy_json, &PolicyLimits::default())?;
//! let engine = PolicyEngine::new(policy);
//!
//! if engine.evaluate(&user, &document) {
//!     // include the document in the retrieval results
//! }
//! ```

use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::EvaluationError;
use crate::explain::{ConditionCheck, Explanation, IdentityCheck, MatchCheck, RuleTrace};
use crate::policy::{Decision, Policy, Rule};
use crate::value::{self, Document, Resolved, UserContext};

/// Evaluates a compiled policy. Cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    policy: Arc<Policy>,
}

impl PolicyEngine {
    pub fn new(policy: impl Into<Arc<Policy>>) -> Self {
        Self {
            policy: policy.into(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    /// Allow/deny decision. Fails closed: any evaluation error denies.
    #[must_use]
    pub fn evaluate(&self, user: &UserContext, document: &Document) -> bool {
        match self.try_evaluate(user, document) {
            Ok(allowed) => allowed,
            Err(error) => {
                warn!(
                    policy_id = %self.policy.id(),
                    error = %error,
                    "Policy evaluation failed, denying"
                );
                false
            }
        }
    }

    /// Allow/deny decision, surfacing exceptional inputs instead of denying.
    pub fn try_evaluate(
        &self,
        user: &UserContext,
        document: &Document,
    ) -> Result<bool, EvaluationError> {
        Ok(decide(&self.policy, user, document, None)?.is_allow())
    }

    /// Decision plus a per-rule trace of how it was reached.
    #[must_use]
    pub fn evaluate_with_explanation(
        &self,
        user: &UserContext,
        document: &Document,
    ) -> Explanation {
        let mut rules = Vec::new();
        match decide(&self.policy, user, document, Some(&mut rules)) {
            Ok(decision) => {
                let matched_rule = rules
                    .last()
                    .filter(|r| r.allowed)
                    .map(|r| r.name.clone());
                Explanation {
                    decision,
                    default_applied: matched_rule.is_none(),
                    matched_rule,
                    rules,
                    error: None,
                }
            }
            Err(error) => Explanation {
                decision: Decision::Deny,
                matched_rule: None,
                default_applied: false,
                rules,
                error: Some(error.to_string()),
            },
        }
    }
}

/// The single walk behind both `evaluate` and `evaluate_with_explanation`.
fn decide(
    policy: &Policy,
    user: &UserContext,
    document: &Document,
    mut traces: Option<&mut Vec<RuleTrace>>,
) -> Result<Decision, EvaluationError> {
    for rule in policy.rules() {
        let allowed = match traces.as_deref_mut() {
            None => rule_allows(rule, user, document)?,
            Some(traces) => {
                let traced = trace_rule(rule, user, document)?;
                let allowed = traced.allowed;
                traces.push(traced);
                allowed
            }
        };

        if allowed {
            trace!(policy_id = %policy.id(), rule = %rule.name(), "Rule allowed document");
            return Ok(Decision::Allow);
        }
    }

    trace!(
        policy_id = %policy.id(),
        default = ?policy.default_decision(),
        "No rule allowed, applying default"
    );
    Ok(policy.default_decision())
}

fn rule_allows(
    rule: &Rule,
    user: &UserContext,
    document: &Document,
) -> Result<bool, EvaluationError> {
    if !rule.match_entries().iter().all(|entry| entry.matches(document)) {
        return Ok(false);
    }

    let allow = rule.allow();
    if allow.is_empty() || !allow.identity_passes(user) {
        return Ok(false);
    }

    for condition in allow.conditions() {
        if !condition.evaluate(user, document)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn trace_rule(
    rule: &Rule,
    user: &UserContext,
    document: &Document,
) -> Result<RuleTrace, EvaluationError> {
    let match_checks: Vec<MatchCheck> = rule
        .match_entries()
        .iter()
        .map(|entry| MatchCheck {
            field: entry.field().key().to_string(),
            expected: entry.expected().clone(),
            actual: Resolved::lookup(document, entry.field().segments()).to_value(),
            passed: entry.matches(document),
        })
        .collect();
    let match_passed = match_checks.iter().all(|check| check.passed);

    let mut traced = RuleTrace {
        name: rule.name().to_string(),
        match_checks,
        match_passed,
        identity: IdentityCheck::NotEvaluated,
        conditions: Vec::new(),
        allowed: false,
    };
    if !match_passed {
        return Ok(traced);
    }

    let allow = rule.allow();
    traced.identity = if allow.is_empty() {
        IdentityCheck::NoGrant
    } else if allow.everyone() {
        IdentityCheck::Everyone
    } else if !allow.roles().is_empty() {
        IdentityCheck::Roles {
            required: allow.roles().iter().cloned().collect(),
            user: value::role_names(user).into_iter().map(String::from).collect(),
            passed: allow.identity_passes(user),
        }
    } else {
        IdentityCheck::Unrestricted
    };
    if !traced.identity.passed() {
        return Ok(traced);
    }

    let mut all_passed = true;
    for condition in allow.conditions() {
        let passed = condition.evaluate(user, document)?;
        all_passed &= passed;
        traced.conditions.push(ConditionCheck {
            condition: condition.source().to_string(),
            passed,
        });
    }
    traced.allowed = all_passed;
    Ok(traced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PolicyLimits;
    use serde_json::{Value, json};

    fn engine(policy: Value) -> PolicyEngine {
        PolicyEngine::new(Policy::from_json(policy, &PolicyLimits::default()).unwrap())
    }

    fn obj(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn department_policy() -> PolicyEngine {
        engine(json!({
            "rules": [{
                "name": "same-department",
                "allow": {"conditions": ["user.department == document.department"]}
            }],
            "default": "deny"
        }))
    }

    // -------------------------------------------------------------------------
    // Rule ordering and defaults
    // -------------------------------------------------------------------------

    #[test]
    fn test_department_scenario() {
        let engine = department_policy();
        let alice = obj(json!({"id": "alice", "department": "engineering"}));
        let bob = obj(json!({"id": "bob", "department": "sales"}));
        let doc = obj(json!({"department": "engineering"}));

        assert!(engine.evaluate(&alice, &doc));
        assert!(!engine.evaluate(&bob, &doc));
    }

    #[test]
    fn test_default_allow_when_nothing_matches() {
        let engine = engine(json!({
            "rules": [{"name": "admins", "allow": {"roles": ["admin"]}}],
            "default": "allow"
        }));
        let user = obj(json!({"id": "u"}));
        assert!(engine.evaluate(&user, &obj(json!({}))));
    }

    #[test]
    fn test_match_gate_sees_document_only() {
        let engine = engine(json!({
            "rules": [{"name": "public", "match": {"visibility": "public"}, "allow": {"everyone": true}}]
        }));
        let user = obj(json!({"id": "u", "visibility": "public"}));
        assert!(engine.evaluate(&user, &obj(json!({"visibility": "public"}))));
        assert!(!engine.evaluate(&user, &obj(json!({"visibility": "private"}))));
        assert!(!engine.evaluate(&user, &obj(json!({}))));
    }

    #[test]
    fn test_roles_and_conditions_both_required() {
        let engine = engine(json!({
            "rules": [{
                "name": "institution-admin",
                "allow": {
                    "roles": ["admin"],
                    "conditions": ["user.institution == document.institution"]
                }
            }]
        }));
        let admin = obj(json!({"id": "a", "roles": ["admin"], "institution": "mit"}));
        let other_admin = obj(json!({"id": "b", "roles": ["admin"], "institution": "uw"}));
        let student = obj(json!({"id": "c", "roles": ["student"], "institution": "mit"}));
        let doc = obj(json!({"institution": "mit"}));

        assert!(engine.evaluate(&admin, &doc));
        assert!(!engine.evaluate(&other_admin, &doc));
        assert!(!engine.evaluate(&student, &doc));
    }

    #[test]
    fn test_empty_allow_clause_grants_nothing() {
        let engine = engine(json!({"rules": [{"name": "nothing", "allow": {}}]}));
        assert!(!engine.evaluate(&obj(json!({"id": "u"})), &obj(json!({}))));
    }

    // -------------------------------------------------------------------------
    // Value semantics through the engine
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_user_field_never_matches() {
        let engine = department_policy();
        let user = obj(json!({"id": "u"}));
        assert!(!engine.evaluate(&user, &obj(json!({"department": "engineering"}))));
        assert!(!engine.evaluate(&user, &obj(json!({}))));
    }

    #[test]
    fn test_negative_operators_on_missing_fields() {
        let engine = engine(json!({"rules": [
            {"name": "ne", "allow": {"conditions": ["document.status != 'archived'"]}}
        ]}));
        let user = obj(json!({"id": "u"}));
        assert!(engine.evaluate(&user, &obj(json!({}))));
        assert!(engine.evaluate(&user, &obj(json!({"status": "live"}))));
        assert!(!engine.evaluate(&user, &obj(json!({"status": "archived"}))));
    }

    #[test]
    fn test_empty_list_literals() {
        let in_empty = engine(json!({"rules": [
            {"name": "r", "allow": {"conditions": ["document.category in []"]}}
        ]}));
        let not_in_empty = engine(json!({"rules": [
            {"name": "r", "allow": {"conditions": ["document.category not in []"]}}
        ]}));
        let user = obj(json!({"id": "u"}));
        for doc in [json!({"category": "a"}), json!({}), json!({"category": null})] {
            let doc = obj(doc);
            assert!(!in_empty.evaluate(&user, &doc));
            assert!(not_in_empty.evaluate(&user, &doc));
        }
    }

    #[test]
    fn test_shared_with_array() {
        let engine = engine(json!({"rules": [
            {"name": "shared", "allow": {"conditions": ["user.id in document.shared_with"]}}
        ]}));
        let doc = obj(json!({"shared_with": ["alice", "carol"]}));
        assert!(engine.evaluate(&obj(json!({"id": "alice"})), &doc));
        assert!(!engine.evaluate(&obj(json!({"id": "bob"})), &doc));
    }

    #[test]
    fn test_exists_treats_null_and_empty_as_absent() {
        let engine = engine(json!({"rules": [
            {"name": "reviewed", "allow": {"conditions": ["document.reviewers exists"]}}
        ]}));
        let user = obj(json!({"id": "u"}));
        assert!(engine.evaluate(&user, &obj(json!({"reviewers": ["x"]}))));
        assert!(!engine.evaluate(&user, &obj(json!({"reviewers": []}))));
        assert!(!engine.evaluate(&user, &obj(json!({"reviewers": null}))));
        assert!(!engine.evaluate(&user, &obj(json!({}))));
    }

    #[test]
    fn test_deep_value_fails_closed() {
        let engine = engine(json!({"rules": [
            {"name": "eq", "allow": {"conditions": ["user.path == document.path"]}}
        ]}));
        let mut deep = json!(1);
        for _ in 0..40 {
            deep = Value::Array(vec![deep]);
        }
        let user = obj(json!({"id": "u", "path": deep.clone()}));
        let doc = obj(json!({"path": deep}));

        assert!(engine.try_evaluate(&user, &doc).is_err());
        assert!(!engine.evaluate(&user, &doc));
        let explanation = engine.evaluate_with_explanation(&user, &doc);
        assert!(!explanation.is_allowed());
        assert!(explanation.error.is_some());
    }

    // -------------------------------------------------------------------------
    // Explanations
    // -------------------------------------------------------------------------

    #[test]
    fn test_explanation_agrees_with_evaluate() {
        let engine = engine(json!({
            "rules": [
                {"name": "public", "match": {"visibility": "public"}, "allow": {"everyone": true}},
                {"name": "admins", "allow": {"roles": ["admin"]}},
                {"name": "dept", "allow": {"conditions": [
                    "user.department == document.department",
                    "document.level <= user.clearance"
                ]}}
            ]
        }));
        let user = obj(json!({"id": "u", "roles": ["staff"], "department": "eng", "clearance": 3}));
        let docs = [
            json!({"visibility": "public"}),
            json!({"department": "eng", "level": 2}),
            json!({"department": "eng", "level": 5}),
            json!({"department": "ops", "level": 1}),
        ];
        for doc in docs {
            let doc = obj(doc);
            let explanation = engine.evaluate_with_explanation(&user, &doc);
            assert_eq!(explanation.is_allowed(), engine.evaluate(&user, &doc));
        }
    }

    #[test]
    fn test_explanation_details() {
        let engine = engine(json!({
            "rules": [
                {"name": "public", "match": {"visibility": "public"}, "allow": {"everyone": true}},
                {"name": "admins", "allow": {"roles": ["admin"]}},
                {"name": "dept", "allow": {"conditions": [
                    "user.department == document.department",
                    "document.level <= user.clearance"
                ]}}
            ]
        }));
        let user = obj(json!({"id": "u", "roles": ["staff"], "department": "eng", "clearance": 3}));
        let doc = obj(json!({"visibility": "internal", "department": "eng", "level": 5}));

        let explanation = engine.evaluate_with_explanation(&user, &doc);
        assert_eq!(explanation.decision, Decision::Deny);
        assert!(explanation.default_applied);
        assert_eq!(explanation.rules.len(), 3);

        let public = explanation.rule("public").unwrap();
        assert!(!public.match_passed);
        assert_eq!(public.match_checks[0].actual, Some(json!("internal")));

        let admins = explanation.rule("admins").unwrap();
        assert!(matches!(admins.identity, IdentityCheck::Roles { passed: false, .. }));

        let dept = explanation.rule("dept").unwrap();
        assert!(dept.conditions[0].passed);
        assert!(!dept.conditions[1].passed);

        let text = explanation.to_string();
        assert!(text.starts_with("DENY (policy default)"));
        assert!(text.contains("document.level <= user.clearance: fail"));
    }

    #[test]
    fn test_explanation_stops_at_allowing_rule() {
        let engine = engine(json!({"rules": [
            {"name": "first", "allow": {"everyone": true}},
            {"name": "second", "allow": {"everyone": true}}
        ]}));
        let explanation =
            engine.evaluate_with_explanation(&obj(json!({"id": "u"})), &obj(json!({})));
        assert_eq!(explanation.matched_rule.as_deref(), Some("first"));
        assert_eq!(explanation.rules.len(), 1);
        assert!(!explanation.default_applied);
    }
}
