//! Policy-to-native filter compilation.
//!
//! For one user and one backend, the compiler lowers every rule to a
//! [`Predicate`], checks it against the backend's capabilities, and ORs the
//! survivors into a single native filter. The result selects exactly the
//! documents the evaluation engine would allow, or compilation fails and the
//! caller post-filters.

use std::fmt;

use ragguard_policy::{Decision, Policy, UserContext};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backends::{
    Backend, ChromaFilterBuilder, FilterBuilder, NativeFilter, PgvectorFilterBuilder,
    PineconeFilterBuilder, QdrantFilterBuilder, WeaviateFilterBuilder,
};
use crate::config::{CompilerConfig, UnsupportedStrategy};
use crate::error::{FilterCompilationError, FilterResult};
use crate::predicate::{self, Predicate};

/// Compiles policies into native filters for every supported backend.
#[derive(Debug, Clone)]
pub struct FilterCompiler {
    config: CompilerConfig,
    fingerprint: String,
    pgvector: PgvectorFilterBuilder,
}

impl Default for FilterCompiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

impl FilterCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        let pgvector = PgvectorFilterBuilder::new(&config.sql_column, config.sql_param_offset);
        Self {
            fingerprint: config.fingerprint(),
            config,
            pgvector,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// See [`CompilerConfig::fingerprint`].
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The builder used for `backend`.
    #[must_use]
    pub fn builder(&self, backend: Backend) -> &dyn FilterBuilder {
        match backend {
            Backend::Qdrant => &QdrantFilterBuilder,
            Backend::Pgvector => &self.pgvector,
            Backend::Pinecone => &PineconeFilterBuilder,
            Backend::Chromadb => &ChromaFilterBuilder,
            Backend::Weaviate => &WeaviateFilterBuilder,
        }
    }

    /// Compile the policy for one user into a native filter.
    pub fn compile(
        &self,
        policy: &Policy,
        user: &UserContext,
        backend: Backend,
    ) -> FilterResult<NativeFilter> {
        if policy.default_decision() == Decision::Allow {
            debug!(policy_id = %policy.id(), %backend, "Default allow policy, no filter needed");
            return Ok(NativeFilter::MatchAll);
        }

        let predicate = self.lower(policy, user, backend)?;
        let filter = self.build(&predicate, backend)?;
        debug!(
            policy_id = %policy.id(),
            %backend,
            terms = predicate.term_count(),
            "Compiled native filter"
        );
        Ok(filter)
    }

    /// Lower the policy to a single backend-checked predicate.
    ///
    /// Ignores the policy default; [`compile`](Self::compile) handles it.
    pub fn lower(
        &self,
        policy: &Policy,
        user: &UserContext,
        backend: Backend,
    ) -> FilterResult<Predicate> {
        let outcomes = self.lower_rules(policy, user, backend);

        if outcomes.iter().any(|(_, outcome)| matches!(outcome, Ok(Predicate::True))) {
            return Ok(Predicate::True);
        }

        let mut parts = Vec::with_capacity(outcomes.len());
        for (rule, outcome) in outcomes {
            match outcome {
                Ok(predicate) => parts.push(predicate),
                Err(reason) => match self.config.unsupported {
                    UnsupportedStrategy::PostFilter => {
                        return Err(FilterCompilationError::RequiresPostFilter {
                            backend,
                            rule: rule.to_string(),
                            reason,
                        });
                    }
                    UnsupportedStrategy::DenyRule => {
                        warn!(
                            policy_id = %policy.id(),
                            rule = %rule,
                            %backend,
                            reason = %reason,
                            "Rule cannot be expressed natively, excluding it from the filter"
                        );
                    }
                },
            }
        }
        Ok(Predicate::or(parts))
    }

    /// Turn a lowered predicate into the backend's filter.
    pub fn build(&self, predicate: &Predicate, backend: Backend) -> FilterResult<NativeFilter> {
        match predicate {
            Predicate::True => Ok(NativeFilter::MatchAll),
            Predicate::False => Ok(NativeFilter::MatchNone),
            predicate => {
                let terms = predicate.term_count();
                if terms > self.config.max_filter_terms {
                    return Err(FilterCompilationError::TooComplex {
                        backend,
                        reason: format!(
                            "{terms} filter terms exceed the limit of {}",
                            self.config.max_filter_terms
                        ),
                    });
                }
                self.builder(backend).build(predicate)
            }
        }
    }

    /// Per-rule account of how the filter was (or could not be) built.
    #[must_use]
    pub fn explain(
        &self,
        policy: &Policy,
        user: &UserContext,
        backend: Backend,
    ) -> FilterExplanation {
        let default_allow = policy.default_decision() == Decision::Allow;
        let rules = self
            .lower_rules(policy, user, backend)
            .into_iter()
            .map(|(name, outcome)| RuleFilterTrace {
                rule: name.to_string(),
                outcome: match outcome {
                    Ok(Predicate::False) => RuleOutcome::Dropped,
                    Ok(Predicate::True) => RuleOutcome::Unrestricted,
                    Ok(predicate) => RuleOutcome::Predicate {
                        predicate: predicate.to_string(),
                    },
                    Err(reason) => RuleOutcome::Unsupported { reason },
                },
            })
            .collect();

        FilterExplanation {
            backend,
            policy_id: policy.id().to_string(),
            default_allow,
            rules,
            result: self.compile(policy, user, backend),
        }
    }

    fn lower_rules<'p>(
        &self,
        policy: &'p Policy,
        user: &UserContext,
        backend: Backend,
    ) -> Vec<(&'p str, Result<Predicate, String>)> {
        let builder = self.builder(backend);
        policy
            .rules()
            .iter()
            .map(|rule| {
                let outcome = predicate::lower_rule(rule, user)
                    .map_err(|unsupported| unsupported.reason)
                    .and_then(|p| builder.check(&p).map(|()| p));
                (rule.name(), outcome)
            })
            .collect()
    }
}

// =============================================================================
// Explanation
// =============================================================================

/// How one rule contributed to a compiled filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleOutcome {
    /// The rule grants this user nothing.
    Dropped,
    /// The rule grants this user every document.
    Unrestricted,
    /// The rule contributes this predicate.
    Predicate { predicate: String },
    /// The backend cannot express the rule.
    Unsupported { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFilterTrace {
    pub rule: String,
    pub outcome: RuleOutcome,
}

/// Result of [`FilterCompiler::explain`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExplanation {
    pub backend: Backend,
    pub policy_id: String,
    /// The policy default allows, so no filter applies.
    pub default_allow: bool,
    pub rules: Vec<RuleFilterTrace>,
    pub result: FilterResult<NativeFilter>,
}

impl fmt::Display for FilterExplanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} filter for policy '{}'", self.backend, self.policy_id)?;
        if self.default_allow {
            writeln!(f, "  default allow: no filter")?;
        }
        for trace in &self.rules {
            match &trace.outcome {
                RuleOutcome::Dropped => writeln!(f, "  [-] {}: grants nothing", trace.rule)?,
                RuleOutcome::Unrestricted => {
                    writeln!(f, "  [*] {}: grants everything", trace.rule)?;
                }
                RuleOutcome::Predicate { predicate } => {
                    writeln!(f, "  [+] {}: {predicate}", trace.rule)?;
                }
                RuleOutcome::Unsupported { reason } => {
                    writeln!(f, "  [!] {}: unsupported ({reason})", trace.rule)?;
                }
            }
        }
        match &self.result {
            Ok(filter) => writeln!(f, "  => {filter}"),
            Err(error) => writeln!(f, "  => error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragguard_policy::PolicyLimits;
    use serde_json::{Value, json};

    fn policy(value: Value) -> Policy {
        Policy::from_json(value, &PolicyLimits::default()).unwrap()
    }

    fn user(value: Value) -> UserContext {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_allow_matches_all() {
        let policy = policy(json!({"rules": [], "default": "allow"}));
        let filter = FilterCompiler::default()
            .compile(&policy, &user(json!({"id": "a"})), Backend::Qdrant)
            .unwrap();
        assert!(filter.is_match_all());
    }

    #[test]
    fn test_no_applicable_rule_matches_none() {
        let policy = policy(json!({"rules": [
            {"name": "admins", "allow": {"roles": ["admin"]}}
        ]}));
        for backend in Backend::ALL {
            let filter = FilterCompiler::default()
                .compile(&policy, &user(json!({"id": "a", "roles": ["staff"]})), backend)
                .unwrap();
            assert!(filter.is_match_none(), "{backend}");
        }
    }

    #[test]
    fn test_everyone_rule_matches_all() {
        let policy = policy(json!({"rules": [
            {"name": "dept", "allow": {"conditions": ["user.department == document.department"]}},
            {"name": "all", "allow": {"everyone": true}}
        ]}));
        let filter = FilterCompiler::default()
            .compile(&policy, &user(json!({"id": "a"})), Backend::Pinecone)
            .unwrap();
        assert!(filter.is_match_all());
    }

    #[test]
    fn test_unsupported_rule_requires_post_filter() {
        let policy = policy(json!({"rules": [
            {"name": "self-review", "allow": {"conditions": ["document.author == document.reviewer"]}}
        ]}));
        let err = FilterCompiler::default()
            .compile(&policy, &user(json!({"id": "a"})), Backend::Qdrant)
            .unwrap_err();
        assert_eq!(
            err,
            FilterCompilationError::RequiresPostFilter {
                backend: Backend::Qdrant,
                rule: "self-review".to_string(),
                reason: "comparison between document fields 'author' and 'reviewer'".to_string(),
            }
        );
        assert!(err.requires_post_filter());
    }

    #[test]
    fn test_deny_rule_strategy_drops_rule() {
        let policy = policy(json!({"rules": [
            {"name": "self-review", "allow": {"conditions": ["document.author == document.reviewer"]}},
            {"name": "public", "match": {"visibility": "public"}, "allow": {"everyone": true}}
        ]}));
        let compiler = FilterCompiler::new(CompilerConfig {
            unsupported: UnsupportedStrategy::DenyRule,
            ..CompilerConfig::default()
        });
        let filter = compiler
            .compile(&policy, &user(json!({"id": "a"})), Backend::Pinecone)
            .unwrap();
        assert_eq!(filter.as_json(), Some(&json!({"visibility": {"$eq": "public"}})));
    }

    #[test]
    fn test_capability_gap_is_unsupported() {
        let policy = policy(json!({"rules": [
            {"name": "reviewed", "allow": {"conditions": ["document.reviewed_by exists"]}}
        ]}));
        let compiler = FilterCompiler::default();
        let alice = user(json!({"id": "alice"}));
        assert!(compiler.compile(&policy, &alice, Backend::Qdrant).is_ok());
        let err = compiler.compile(&policy, &alice, Backend::Chromadb).unwrap_err();
        assert!(matches!(err, FilterCompilationError::RequiresPostFilter { .. }));
    }

    #[test]
    fn test_term_limit() {
        let list: Vec<String> = (0..20).map(|i| format!("'v{i}'")).collect();
        let condition = format!("document.tag in [{}]", list.join(", "));
        let policy = policy(json!({"rules": [
            {"name": "tags", "allow": {"conditions": [condition, "document.owner exists"]}}
        ]}));
        let compiler = FilterCompiler::new(CompilerConfig {
            max_filter_terms: 1,
            ..CompilerConfig::default()
        });
        let err = compiler
            .compile(&policy, &user(json!({"id": "a"})), Backend::Qdrant)
            .unwrap_err();
        assert!(matches!(err, FilterCompilationError::TooComplex { .. }));
    }

    #[test]
    fn test_explain_lists_rule_outcomes() {
        let policy = policy(json!({"id": "docs", "rules": [
            {"name": "admins", "allow": {"roles": ["admin"]}},
            {"name": "dept", "allow": {"conditions": ["user.department == document.department"]}},
            {"name": "self-review", "allow": {"conditions": ["document.author == document.reviewer"]}}
        ]}));
        let explanation = FilterCompiler::default().explain(
            &policy,
            &user(json!({"id": "a", "department": "eng"})),
            Backend::Qdrant,
        );
        assert_eq!(explanation.rules[0].outcome, RuleOutcome::Dropped);
        assert_eq!(
            explanation.rules[1].outcome,
            RuleOutcome::Predicate {
                predicate: "department == \"eng\"".to_string()
            }
        );
        assert!(matches!(explanation.rules[2].outcome, RuleOutcome::Unsupported { .. }));
        assert!(explanation.result.is_err());

        let text = explanation.to_string();
        assert!(text.starts_with("qdrant filter for policy 'docs'"));
        assert!(text.contains("[-] admins: grants nothing"));
        assert!(text.contains("=> error:"));
    }
}
