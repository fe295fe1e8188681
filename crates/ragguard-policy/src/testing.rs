//! Table-driven policy checks.
//!
//! Policy authors describe expected outcomes as `(user, document, expected)`
//! cases and run them against a compiled policy before deploying it. Failed
//! cases carry the full evaluation trace.
//!
//! ```ignore
//! let suite: PolicyTestSuite = serde_json::from_value(cases_json)?;
//! let report = suite.run(&policy);
//! assert!(report.all_passed(), "{report}");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::PolicyEngine;
use crate::explain::Explanation;
use crate::policy::{Decision, Policy};
use crate::value::{Document, UserContext};

/// One expected outcome.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PolicyTestCase {
    pub name: String,
    pub user: UserContext,
    pub document: Document,
    pub expected: Decision,
}

/// An ordered collection of cases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PolicyTestSuite {
    cases: Vec<PolicyTestCase>,
}

impl PolicyTestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a case.
    pub fn case(
        mut self,
        name: impl Into<String>,
        user: UserContext,
        document: Document,
        expected: Decision,
    ) -> Self {
        self.cases.push(PolicyTestCase {
            name: name.into(),
            user,
            document,
            expected,
        });
        self
    }

    #[must_use]
    pub fn cases(&self) -> &[PolicyTestCase] {
        &self.cases
    }

    /// Run every case against the policy.
    pub fn run(&self, policy: &Policy) -> PolicyTestReport {
        let engine = PolicyEngine::new(policy.clone());
        let mut report = PolicyTestReport::default();

        for case in &self.cases {
            let explanation = engine.evaluate_with_explanation(&case.user, &case.document);
            if explanation.decision == case.expected {
                report.passed += 1;
            } else {
                report.failures.push(PolicyTestFailure {
                    name: case.name.clone(),
                    expected: case.expected,
                    actual: explanation.decision,
                    explanation,
                });
            }
        }

        report
    }
}

/// A case whose decision differed from the expectation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyTestFailure {
    pub name: String,
    pub expected: Decision,
    pub actual: Decision,
    pub explanation: Explanation,
}

/// Outcome of a suite run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolicyTestReport {
    pub passed: usize,
    pub failures: Vec<PolicyTestFailure>,
}

impl PolicyTestReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.passed + self.failures.len()
    }
}

impl fmt::Display for PolicyTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}/{} policy cases passed", self.passed, self.total())?;
        for failure in &self.failures {
            writeln!(
                f,
                "FAILED {}: expected {:?}, got {:?}",
                failure.name, failure.expected, failure.actual
            )?;
            write!(f, "{}", failure.explanation)?;
        }
        Ok(())
    }
}
