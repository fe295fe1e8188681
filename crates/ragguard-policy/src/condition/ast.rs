//! Compiled condition expression tree.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{EvaluationError, PolicyValidationError};
use crate::value::{self, Document, MAX_VALUE_DEPTH, Resolved, UserContext};

static SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("Invalid field segment regex")
});

// =============================================================================
// Field paths
// =============================================================================

/// Which object a field path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    User,
    Document,
}

impl Scope {
    fn prefix(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Document => "document",
        }
    }
}

/// A dotted field path, split once at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    scope: Scope,
    segments: Arc<[String]>,
    key: String,
}

impl FieldPath {
    /// Build a path from a scope and a dotted key relative to it.
    pub fn new(scope: Scope, key: &str) -> Result<Self, PolicyValidationError> {
        if key.is_empty() {
            return Err(PolicyValidationError::invalid_path(
                format!("{}.", scope.prefix()),
                "field name is empty",
            ));
        }
        let segments: Vec<String> = key.split('.').map(str::to_string).collect();
        for segment in &segments {
            if segment.is_empty() {
                return Err(PolicyValidationError::invalid_path(
                    format!("{}.{key}", scope.prefix()),
                    "empty path segment",
                ));
            }
            if !SEGMENT_REGEX.is_match(segment) {
                return Err(PolicyValidationError::invalid_path(
                    format!("{}.{key}", scope.prefix()),
                    format!("invalid segment '{segment}'"),
                ));
            }
        }
        Ok(Self {
            scope,
            segments: segments.into(),
            key: key.to_string(),
        })
    }

    /// Parse a fully qualified path such as `user.department`.
    pub fn parse(qualified: &str) -> Result<Self, PolicyValidationError> {
        if let Some(rest) = qualified.strip_prefix("user.") {
            Self::new(Scope::User, rest)
        } else if let Some(rest) = qualified.strip_prefix("document.") {
            Self::new(Scope::Document, rest)
        } else {
            Err(PolicyValidationError::invalid_path(
                qualified,
                "paths must start with 'user.' or 'document.'",
            ))
        }
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The dotted key relative to the scope (`department`, `meta.team`).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `true` for a single-segment path.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.segments.len() == 1
    }

    /// Resolve against the user context or the document.
    pub fn resolve<'a>(&self, user: &'a UserContext, document: &'a Document) -> Resolved<'a> {
        match self.scope {
            Scope::User => Resolved::lookup(user, &self.segments),
            Scope::Document => Resolved::lookup(document, &self.segments),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scope.prefix(), self.key)
    }
}

// =============================================================================
// Operators and operands
// =============================================================================

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
}

impl CompareOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }

    /// `true` for `>`, `<`, `>=`, `<=`.
    #[must_use]
    pub fn is_range(self) -> bool {
        matches!(self, Self::Gt | Self::Lt | Self::Gte | Self::Lte)
    }

    /// The operator with its operands swapped (`a > b` is `b < a`).
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Lt => Self::Gt,
            Self::Gte => Self::Lte,
            Self::Lte => Self::Gte,
            other => other,
        }
    }

    /// Ordering predicate for range operators.
    #[must_use]
    pub fn ordering_test(self) -> Option<fn(Ordering) -> bool> {
        match self {
            Self::Gt => Some(Ordering::is_gt),
            Self::Lt => Some(Ordering::is_lt),
            Self::Gte => Some(Ordering::is_ge),
            Self::Lte => Some(Ordering::is_le),
            _ => None,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(FieldPath),
    Literal(Value),
    List(Vec<Value>),
}

impl Operand {
    pub fn resolve<'a>(&'a self, user: &'a UserContext, document: &'a Document) -> Resolved<'a> {
        match self {
            Self::Field(path) => path.resolve(user, document),
            Self::Literal(value) => Resolved::Value(value),
            Self::List(items) => Resolved::List(items),
        }
    }

    #[must_use]
    pub fn as_field(&self) -> Option<&FieldPath> {
        match self {
            Self::Field(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(path) => write!(f, "{path}"),
            Self::Literal(value) => write!(f, "{value}"),
            Self::List(items) => write!(f, "{}", Value::Array(items.clone())),
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// A compiled condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Exists {
        field: FieldPath,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// Evaluate against a user and document.
    pub fn evaluate(
        &self,
        user: &UserContext,
        document: &Document,
    ) -> Result<bool, value::DepthExceeded> {
        match self {
            Self::Compare { left, op, right } => {
                compare(*op, left.resolve(user, document), right.resolve(user, document))
            }
            Self::Exists { field, negated } => {
                Ok(value::exists(field.resolve(user, document)) != *negated)
            }
            Self::And(items) => {
                for item in items {
                    if !item.evaluate(user, document)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(items) => {
                for item in items {
                    if item.evaluate(user, document)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Visit every field path in the expression.
    pub fn visit_fields<'a>(&'a self, visit: &mut impl FnMut(&'a FieldPath)) {
        match self {
            Self::Compare { left, right, .. } => {
                if let Some(path) = left.as_field() {
                    visit(path);
                }
                if let Some(path) = right.as_field() {
                    visit(path);
                }
            }
            Self::Exists { field, .. } => visit(field),
            Self::And(items) | Self::Or(items) => {
                for item in items {
                    item.visit_fields(visit);
                }
            }
        }
    }

    /// Number of leaf comparisons.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Compare { .. } | Self::Exists { .. } => 1,
            Self::And(items) | Self::Or(items) => items.iter().map(Self::leaf_count).sum(),
        }
    }
}

/// Apply a comparison operator to two resolved operands.
pub fn compare(
    op: CompareOp,
    left: Resolved<'_>,
    right: Resolved<'_>,
) -> Result<bool, value::DepthExceeded> {
    match op {
        CompareOp::Eq => value::equals(left, right),
        CompareOp::Ne => Ok(!value::equals(left, right)?),
        CompareOp::In => Ok(value::membership(left, right)),
        CompareOp::NotIn => Ok(!value::membership(left, right)),
        CompareOp::Gt | CompareOp::Lt | CompareOp::Gte | CompareOp::Lte => Ok(op
            .ordering_test()
            .is_some_and(|accept| value::range_holds(left, right, accept))),
    }
}

/// A condition string compiled into an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    source: String,
    expr: Expr,
}

impl CompiledCondition {
    pub(crate) fn new(source: String, expr: Expr) -> Self {
        Self { source, expr }
    }

    /// The condition as written in the policy.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(
        &self,
        user: &UserContext,
        document: &Document,
    ) -> Result<bool, EvaluationError> {
        self.expr
            .evaluate(user, document)
            .map_err(|_| EvaluationError::ValueTooDeep {
                condition: self.source.clone(),
                max: MAX_VALUE_DEPTH,
            })
    }

    /// Collect the keys of every `user.*` path the condition reads.
    pub fn collect_user_fields(&self, out: &mut BTreeSet<String>) {
        self.expr.visit_fields(&mut |path| {
            if path.scope() == Scope::User {
                out.insert(path.key().to_string());
            }
        });
    }
}

impl fmt::Display for CompiledCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_parse() {
        let path = FieldPath::parse("document.meta.team").unwrap();
        assert_eq!(path.scope(), Scope::Document);
        assert_eq!(path.segments(), &["meta".to_string(), "team".to_string()]);
        assert_eq!(path.to_string(), "document.meta.team");
        assert!(!path.is_flat());
    }

    #[test]
    fn test_field_path_rejects_bad_input() {
        assert!(FieldPath::parse("doc.x").is_err());
        assert!(FieldPath::parse("user.").is_err());
        assert!(FieldPath::parse("user.a..b").is_err());
        assert!(FieldPath::parse("user.a;drop").is_err());
    }

    #[test]
    fn test_flipped_operators() {
        assert_eq!(CompareOp::Gt.flipped(), CompareOp::Lt);
        assert_eq!(CompareOp::Lte.flipped(), CompareOp::Gte);
        assert_eq!(CompareOp::Eq.flipped(), CompareOp::Eq);
    }
}
