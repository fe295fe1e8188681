//! Policy model.
//!
//! A [`PolicyDocument`] is the declarative shape produced by an external
//! loader (YAML, JSON, a database row). [`Policy::compile`] validates it
//! against [`PolicyLimits`], compiles every condition, and yields an immutable
//! [`Policy`] that is safe to share across threads.

use std::collections::{BTreeSet, HashSet};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::condition::{CompiledCondition, FieldPath, Scope, compile_condition};
use crate::config::PolicyLimits;
use crate::error::{PolicyResult, PolicyValidationError};
use crate::value::{self, Document, Resolved, UserContext};

// =============================================================================
// Declarative document
// =============================================================================

/// The decision applied when no rule allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    #[default]
    Deny,
}

impl Decision {
    #[must_use]
    pub fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed { Self::Allow } else { Self::Deny }
    }
}

/// Declarative policy as delivered by a loader.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PolicyDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub rules: Vec<RuleDocument>,

    #[serde(default)]
    pub default: Decision,
}

fn default_version() -> String {
    "1".to_string()
}

impl PolicyDocument {
    /// Decode a document from a JSON value.
    pub fn from_json(value: Value) -> PolicyResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| PolicyValidationError::InvalidDocument(e.to_string()))
    }
}

/// Declarative rule.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RuleDocument {
    pub name: String,

    /// Document fields that must equal the given values for the rule to apply.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_fields: Option<Map<String, Value>>,

    #[serde(default)]
    pub allow: AllowDocument,
}

/// Declarative allow clause.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AllowDocument {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub everyone: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

// =============================================================================
// Compiled model
// =============================================================================

/// A `match` entry: document field and the value it must equal.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEntry {
    field: FieldPath,
    expected: Value,
}

impl MatchEntry {
    #[must_use]
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    #[must_use]
    pub fn expected(&self) -> &Value {
        &self.expected
    }

    /// `true` when the document field equals the expected value.
    #[must_use]
    pub fn matches(&self, document: &Document) -> bool {
        let actual = Resolved::lookup(document, self.field.segments());
        value::equals(actual, Resolved::Value(&self.expected)).unwrap_or(false)
    }
}

/// Who a rule grants access to, and under which conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct AllowClause {
    everyone: bool,
    roles: IndexSet<String>,
    conditions: Vec<CompiledCondition>,
}

impl AllowClause {
    #[must_use]
    pub fn everyone(&self) -> bool {
        self.everyone
    }

    #[must_use]
    pub fn roles(&self) -> &IndexSet<String> {
        &self.roles
    }

    #[must_use]
    pub fn conditions(&self) -> &[CompiledCondition] {
        &self.conditions
    }

    /// `true` when the clause names no audience and no conditions, so it
    /// can never grant access.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.everyone && self.roles.is_empty() && self.conditions.is_empty()
    }

    /// Identity gate: `everyone`, an intersecting role, or no identity clause.
    #[must_use]
    pub fn identity_passes(&self, user: &UserContext) -> bool {
        if self.everyone || self.roles.is_empty() {
            return true;
        }
        value::role_names(user)
            .into_iter()
            .any(|role| self.roles.contains(role))
    }
}

/// A compiled rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    name: String,
    match_entries: Vec<MatchEntry>,
    allow: AllowClause,
}

impl Rule {
    fn compile(index: usize, doc: &RuleDocument, limits: &PolicyLimits) -> PolicyResult<Self> {
        if doc.name.trim().is_empty() {
            return Err(PolicyValidationError::EmptyRuleName { index });
        }

        let conditions = &doc.allow.conditions;
        if conditions.len() > limits.max_conditions_per_rule {
            return Err(PolicyValidationError::TooManyConditions {
                rule: doc.name.clone(),
                count: conditions.len(),
                max: limits.max_conditions_per_rule,
            });
        }

        let mut match_entries = Vec::new();
        for (key, expected) in doc.match_fields.iter().flatten() {
            match_entries.push(compile_match(&doc.name, key, expected)?);
        }

        let conditions = conditions
            .iter()
            .map(|source| compile_condition(source, limits))
            .collect::<PolicyResult<Vec<_>>>()?;

        Ok(Self {
            name: doc.name.clone(),
            match_entries,
            allow: AllowClause {
                everyone: doc.allow.everyone,
                roles: doc.allow.roles.iter().cloned().collect(),
                conditions,
            },
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn match_entries(&self) -> &[MatchEntry] {
        &self.match_entries
    }

    #[must_use]
    pub fn allow(&self) -> &AllowClause {
        &self.allow
    }
}

fn compile_match(rule: &str, key: &str, expected: &Value) -> PolicyResult<MatchEntry> {
    let invalid = |message: &str| PolicyValidationError::InvalidMatch {
        rule: rule.to_string(),
        field: key.to_string(),
        message: message.to_string(),
    };

    let relative = key.strip_prefix("document.").unwrap_or(key);
    let field =
        FieldPath::new(Scope::Document, relative).map_err(|_| invalid("invalid field path"))?;

    match expected {
        Value::Null => return Err(invalid("null never matches; use a condition with 'not exists'")),
        Value::Object(_) => return Err(invalid("objects cannot be matched")),
        Value::Array(items) if !items.iter().all(value::is_scalar) => {
            return Err(invalid("list values must contain only strings, numbers or booleans"));
        }
        _ => {}
    }

    Ok(MatchEntry {
        field,
        expected: expected.clone(),
    })
}

/// An immutable, validated policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    id: String,
    version: String,
    rules: Vec<Rule>,
    default: Decision,
    fingerprint: String,
    user_fields: Vec<FieldPath>,
}

impl Policy {
    /// Validate and compile a policy document.
    pub fn compile(document: &PolicyDocument, limits: &PolicyLimits) -> PolicyResult<Self> {
        let encoded = serde_json::to_vec(document)
            .map_err(|e| PolicyValidationError::InvalidDocument(e.to_string()))?;
        if encoded.len() > limits.max_policy_size_bytes {
            return Err(PolicyValidationError::PolicyTooLarge {
                size: encoded.len(),
                max: limits.max_policy_size_bytes,
            });
        }
        if document.rules.len() > limits.max_rules {
            return Err(PolicyValidationError::TooManyRules {
                count: document.rules.len(),
                max: limits.max_rules,
            });
        }

        let mut names = HashSet::new();
        let mut rules = Vec::with_capacity(document.rules.len());
        for (index, rule_doc) in document.rules.iter().enumerate() {
            let rule = Rule::compile(index, rule_doc, limits)?;
            if !names.insert(rule.name.clone()) {
                return Err(PolicyValidationError::DuplicateRuleName { name: rule.name });
            }
            rules.push(rule);
        }

        let fingerprint = hex::encode(Sha256::digest(&encoded));
        let id = document
            .id
            .clone()
            .unwrap_or_else(|| format!("policy-{}", &fingerprint[..12]));

        let mut keys: BTreeSet<String> = ["id", "roles"].into_iter().map(String::from).collect();
        for rule in &rules {
            for condition in &rule.allow.conditions {
                condition.collect_user_fields(&mut keys);
            }
        }
        let user_fields = keys
            .iter()
            .map(|key| FieldPath::new(Scope::User, key))
            .collect::<PolicyResult<Vec<_>>>()?;

        debug!(
            policy_id = %id,
            rules = rules.len(),
            default = ?document.default,
            "Compiled policy"
        );

        Ok(Self {
            id,
            version: document.version.clone(),
            rules,
            default: document.default,
            fingerprint,
            user_fields,
        })
    }

    /// Decode and compile a policy from a JSON value.
    pub fn from_json(value: Value, limits: &PolicyLimits) -> PolicyResult<Self> {
        Self::compile(&PolicyDocument::from_json(value)?, limits)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn default_decision(&self) -> Decision {
        self.default
    }

    /// SHA-256 of the canonical source document, hex encoded.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// User fields the policy can observe: `id`, `roles` and every `user.*`
    /// path referenced by a condition, sorted.
    #[must_use]
    pub fn referenced_user_fields(&self) -> &[FieldPath] {
        &self.user_fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(value: Value) -> PolicyResult<Policy> {
        Policy::from_json(value, &PolicyLimits::default())
    }

    #[test]
    fn test_compile_minimal_policy() {
        let policy = compile(json!({
            "version": "1",
            "rules": [
                {"name": "public", "match": {"visibility": "public"}, "allow": {"everyone": true}}
            ],
            "default": "deny"
        }))
        .unwrap();

        assert_eq!(policy.rules().len(), 1);
        assert_eq!(policy.default_decision(), Decision::Deny);
        assert_eq!(policy.rules()[0].match_entries()[0].field().key(), "visibility");
        assert!(policy.id().starts_with("policy-"));
        assert_eq!(policy.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let doc = json!({"rules": [{"name": "r", "allow": {"roles": ["admin"]}}]});
        let a = compile(doc.clone()).unwrap();
        let b = compile(doc).unwrap();
        let c = compile(json!({"rules": [{"name": "r", "allow": {"roles": ["staff"]}}]})).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_referenced_user_fields() {
        let policy = compile(json!({
            "rules": [{
                "name": "dept",
                "allow": {"conditions": [
                    "user.department == document.department",
                    "document.level <= user.profile.clearance"
                ]}
            }]
        }))
        .unwrap();
        let keys: Vec<&str> = policy.referenced_user_fields().iter().map(FieldPath::key).collect();
        assert_eq!(keys, vec!["department", "id", "profile.clearance", "roles"]);
    }

    #[test]
    fn test_max_rules_boundary() {
        let rules = |n: usize| -> Vec<Value> {
            (0..n)
                .map(|i| json!({"name": format!("r{i}"), "allow": {"roles": ["admin"]}}))
                .collect()
        };
        assert!(compile(json!({"rules": rules(100)})).is_ok());
        let err = compile(json!({"rules": rules(101)})).unwrap_err();
        assert!(err.to_string().contains("Too many rules"));
    }

    #[test]
    fn test_too_many_conditions() {
        let limits = PolicyLimits {
            max_conditions_per_rule: 2,
            ..PolicyLimits::default()
        };
        let doc = PolicyDocument::from_json(json!({
            "rules": [{"name": "r", "allow": {"conditions": [
                "document.a exists", "document.b exists", "document.c exists"
            ]}}]
        }))
        .unwrap();
        let err = Policy::compile(&doc, &limits).unwrap_err();
        assert!(err.to_string().contains("Too many conditions"));
    }

    #[test]
    fn test_policy_size_limit() {
        let limits = PolicyLimits {
            max_policy_size_bytes: 64,
            ..PolicyLimits::default()
        };
        let doc = PolicyDocument::from_json(json!({
            "rules": [{"name": "a-rather-long-rule-name", "allow": {"conditions": [
                "document.category in ['one', 'two', 'three', 'four']"
            ]}}]
        }))
        .unwrap();
        let err = Policy::compile(&doc, &limits).unwrap_err();
        assert!(err.to_string().contains("Policy too large"));
    }

    #[test]
    fn test_duplicate_and_empty_rule_names() {
        let err = compile(json!({"rules": [
            {"name": "r", "allow": {"everyone": true}},
            {"name": "r", "allow": {"everyone": true}}
        ]}))
        .unwrap_err();
        assert!(matches!(err, PolicyValidationError::DuplicateRuleName { .. }));

        let err =
            compile(json!({"rules": [{"name": " ", "allow": {"everyone": true}}]})).unwrap_err();
        assert!(matches!(err, PolicyValidationError::EmptyRuleName { index: 0 }));
    }

    #[test]
    fn test_invalid_match_values() {
        let err = compile(json!({"rules": [
            {"name": "r", "match": {"owner": null}, "allow": {"everyone": true}}
        ]}))
        .unwrap_err();
        assert!(matches!(err, PolicyValidationError::InvalidMatch { .. }));

        let err = compile(json!({"rules": [
            {"name": "r", "match": {"meta": {"a": 1}}, "allow": {"everyone": true}}
        ]}))
        .unwrap_err();
        assert!(matches!(err, PolicyValidationError::InvalidMatch { .. }));
    }

    #[test]
    fn test_condition_errors_propagate() {
        let err = compile(json!({"rules": [
            {"name": "r", "allow": {"conditions": ["user.id === document.owner"]}}
        ]}))
        .unwrap_err();
        assert!(matches!(err, PolicyValidationError::InvalidOperator { .. }));
    }

    #[test]
    fn test_unknown_default_rejected() {
        let err = PolicyDocument::from_json(json!({"rules": [], "default": "maybe"})).unwrap_err();
        assert!(matches!(err, PolicyValidationError::InvalidDocument(_)));
    }

    #[test]
    fn test_identity_gate() {
        let policy = compile(json!({"rules": [
            {"name": "staff", "allow": {"roles": ["staff", "admin"]}}
        ]}))
        .unwrap();
        let allow = policy.rules()[0].allow();
        let user = |v: Value| v.as_object().cloned().unwrap();
        assert!(allow.identity_passes(&user(json!({"roles": ["admin"]}))));
        assert!(allow.identity_passes(&user(json!({"roles": "staff"}))));
        assert!(!allow.identity_passes(&user(json!({"roles": ["guest"]}))));
        assert!(!allow.identity_passes(&user(json!({}))));
    }
}
