//! # ragguard-policy
//!
//! Access-control policies for retrieval-augmented generation.
//!
//! This crate owns the policy side of permission-aware vector search:
//!
//! - **Condition language**: `user.department == document.department`,
//!   `document.category in ['public', 'internal']`, `document.reviewed exists`
//! - **Policy model**: ordered rules with `match` gates and allow clauses,
//!   validated against [`PolicyLimits`] at compile time
//! - **Evaluation engine**: side-effect-free allow/deny decisions with an
//!   optional audit trail ([`Explanation`])
//! - **Policy testing**: table-driven expected-outcome checks
//!
//! Translating a policy into native vector-store filters lives in the
//! `ragguard-filter` crate.

pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod explain;
pub mod policy;
pub mod testing;
pub mod value;

pub use condition::{
    CompareOp, CompiledCondition, Expr, FieldPath, Operand, Scope, compile_condition,
};
pub use config::PolicyLimits;
pub use engine::PolicyEngine;
pub use error::{ConfigError, EvaluationError, PolicyResult, PolicyValidationError};
pub use explain::{ConditionCheck, Explanation, IdentityCheck, MatchCheck, RuleTrace};
pub use policy::{
    AllowClause, AllowDocument, Decision, MatchEntry, Policy, PolicyDocument, Rule, RuleDocument,
};
pub use testing::{PolicyTestCase, PolicyTestFailure, PolicyTestReport, PolicyTestSuite};
pub use value::{Document, Resolved, UserContext};
