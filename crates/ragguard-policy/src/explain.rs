//! Evaluation audit trail.
//!
//! Produced by [`evaluate_with_explanation`] to answer "why was this
//! document (not) returned for this user?".
//!
//! [`evaluate_with_explanation`]: crate::PolicyEngine::evaluate_with_explanation

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::policy::Decision;

/// Full trace of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    /// Final decision.
    pub decision: Decision,

    /// Name of the rule that granted access, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,

    /// `true` when no rule allowed and the policy default decided.
    pub default_applied: bool,

    /// Rules in evaluation order, up to and including the allowing rule.
    pub rules: Vec<RuleTrace>,

    /// Set when evaluation failed closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Explanation {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allow()
    }

    /// Trace for the named rule, if it was evaluated.
    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&RuleTrace> {
        self.rules.iter().find(|r| r.name == name)
    }
}

/// How one rule was evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleTrace {
    pub name: String,

    /// Per-field results of the `match` gate. Empty when the rule has none.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub match_checks: Vec<MatchCheck>,

    pub match_passed: bool,

    pub identity: IdentityCheck,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionCheck>,

    pub allowed: bool,
}

/// One `match` entry compared against the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCheck {
    pub field: String,
    pub expected: Value,
    /// `None` when the document lacks the field.
    pub actual: Option<Value>,
    pub passed: bool,
}

/// Outcome of the identity gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityCheck {
    /// `everyone: true`.
    Everyone,
    /// Role intersection.
    Roles {
        required: Vec<String>,
        user: Vec<String>,
        passed: bool,
    },
    /// No identity clause; conditions alone decide.
    Unrestricted,
    /// The allow clause is empty and grants nothing.
    NoGrant,
    /// The `match` gate failed first.
    NotEvaluated,
}

impl IdentityCheck {
    #[must_use]
    pub fn passed(&self) -> bool {
        match self {
            Self::Everyone | Self::Unrestricted => true,
            Self::Roles { passed, .. } => *passed,
            Self::NoGrant | Self::NotEvaluated => false,
        }
    }
}

/// One condition and its result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionCheck {
    pub condition: String,
    pub passed: bool,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.is_allowed() { "ALLOW" } else { "DENY" };
        match (&self.matched_rule, self.default_applied) {
            (Some(rule), _) => writeln!(f, "{verdict} (rule '{rule}')")?,
            (None, true) => writeln!(f, "{verdict} (policy default)")?,
            (None, false) => writeln!(f, "{verdict}")?,
        }

        for rule in &self.rules {
            let mark = if rule.allowed { "+" } else { "-" };
            writeln!(f, "  [{mark}] {}", rule.name)?;
            for check in &rule.match_checks {
                let actual = check
                    .actual
                    .as_ref()
                    .map_or_else(|| "<missing>".to_string(), Value::to_string);
                writeln!(
                    f,
                    "      match {} = {} (document has {actual}): {}",
                    check.field,
                    check.expected,
                    pass_fail(check.passed)
                )?;
            }
            match &rule.identity {
                IdentityCheck::Everyone => writeln!(f, "      identity: everyone")?,
                IdentityCheck::Roles {
                    required,
                    user,
                    passed,
                } => writeln!(
                    f,
                    "      identity: roles {required:?} vs user {user:?}: {}",
                    pass_fail(*passed)
                )?,
                IdentityCheck::Unrestricted => writeln!(f, "      identity: any user")?,
                IdentityCheck::NoGrant => writeln!(f, "      identity: empty allow clause")?,
                IdentityCheck::NotEvaluated => {}
            }
            for check in &rule.conditions {
                writeln!(f, "      {}: {}", check.condition, pass_fail(check.passed))?;
            }
        }

        if let Some(error) = &self.error {
            writeln!(f, "  error: {error}")?;
        }
        Ok(())
    }
}

fn pass_fail(passed: bool) -> &'static str {
    if passed { "pass" } else { "fail" }
}
