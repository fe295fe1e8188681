//! Backend-neutral filter predicates.
//!
//! A [`Predicate`] is what remains of a policy once a concrete user is known:
//! every `user.*` value has been substituted, every sub-expression that only
//! depends on the user has been folded to a constant, and identity gates have
//! been resolved. What is left only reads document fields and can be handed
//! to a backend builder.
//!
//! Lowering never widens access. Anything that cannot be expressed over
//! document fields alone is reported as [`Unsupported`].

use std::fmt;

use ragguard_policy::condition::compare;
use ragguard_policy::value::{self, Resolved};
use ragguard_policy::{CompareOp, Document, Expr, FieldPath, Operand, Rule, Scope, UserContext};
use serde_json::Value;

/// Range operators usable in native filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl RangeOp {
    fn from_compare(op: CompareOp) -> Option<Self> {
        match op {
            CompareOp::Gt => Some(Self::Gt),
            CompareOp::Gte => Some(Self::Gte),
            CompareOp::Lt => Some(Self::Lt),
            CompareOp::Lte => Some(Self::Lte),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Whether `ordering` (field compared to value) satisfies the operator.
    #[must_use]
    pub fn accepts(self, ordering: std::cmp::Ordering) -> bool {
        match self {
            Self::Gt => ordering.is_gt(),
            Self::Gte => ordering.is_ge(),
            Self::Lt => ordering.is_lt(),
            Self::Lte => ordering.is_le(),
        }
    }
}

/// A boolean predicate over document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    /// Field (or one of its array elements) equals a scalar.
    Eq { field: FieldPath, value: Value },
    /// Negation of [`Predicate::Eq`]; holds for absent fields.
    Ne { field: FieldPath, value: Value },
    /// Field (or one of its array elements) equals one of the scalars.
    In { field: FieldPath, values: Vec<Value> },
    /// Negation of [`Predicate::In`]; holds for absent fields.
    NotIn { field: FieldPath, values: Vec<Value> },
    /// Present, non-null and not an empty array.
    Exists { field: FieldPath },
    NotExists { field: FieldPath },
    /// Field (or one of its numeric array elements) compares to a number.
    Range {
        field: FieldPath,
        op: RangeOp,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Conjunction with constant folding and flattening.
    #[must_use]
    pub fn and(items: Vec<Predicate>) -> Self {
        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Self::True => {}
                Self::False => return Self::False,
                Self::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::True,
            1 => flat.remove(0),
            _ => Self::And(flat),
        }
    }

    /// Disjunction with constant folding and flattening.
    #[must_use]
    pub fn or(items: Vec<Predicate>) -> Self {
        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Self::False => {}
                Self::True => return Self::True,
                Self::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::False,
            1 => flat.remove(0),
            _ => Self::Or(flat),
        }
    }

    fn constant(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }

    /// The document field a leaf reads, `None` for constants and connectives.
    #[must_use]
    pub fn field(&self) -> Option<&FieldPath> {
        match self {
            Self::Eq { field, .. }
            | Self::Ne { field, .. }
            | Self::In { field, .. }
            | Self::NotIn { field, .. }
            | Self::Exists { field }
            | Self::NotExists { field }
            | Self::Range { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Number of filter terms. Membership tests count one term per value.
    #[must_use]
    pub fn term_count(&self) -> usize {
        match self {
            Self::True | Self::False => 0,
            Self::And(items) | Self::Or(items) => items.iter().map(Self::term_count).sum(),
            Self::In { values, .. } | Self::NotIn { values, .. } => values.len(),
            _ => 1,
        }
    }

    /// Visit every leaf, stopping at the first error.
    pub fn try_for_each_leaf<E>(
        &self,
        visit: &mut impl FnMut(&Predicate) -> Result<(), E>,
    ) -> Result<(), E> {
        match self {
            Self::True | Self::False => Ok(()),
            Self::And(items) | Self::Or(items) => {
                for item in items {
                    item.try_for_each_leaf(visit)?;
                }
                Ok(())
            }
            leaf => visit(leaf),
        }
    }

    /// Reference semantics: does the document satisfy the predicate?
    ///
    /// Backend builders must produce filters that select exactly the
    /// documents for which this returns `true`.
    #[must_use]
    pub fn matches(&self, document: &Document) -> bool {
        let lookup = |field: &FieldPath| Resolved::lookup(document, field.segments());
        match self {
            Self::True => true,
            Self::False => false,
            Self::Eq { field, value } => {
                value::equals(lookup(field), Resolved::Value(value)).unwrap_or(false)
            }
            Self::Ne { field, value } => {
                !value::equals(lookup(field), Resolved::Value(value)).unwrap_or(false)
            }
            Self::In { field, values } => value::membership(lookup(field), Resolved::List(values)),
            Self::NotIn { field, values } => {
                !value::membership(lookup(field), Resolved::List(values))
            }
            Self::Exists { field } => value::exists(lookup(field)),
            Self::NotExists { field } => !value::exists(lookup(field)),
            Self::Range { field, op, value } => {
                let op = *op;
                lookup(field).elements().iter().any(|element| {
                    value::compare_numbers(element, value).is_some_and(|ord| op.accepts(ord))
                })
            }
            Self::And(items) => items.iter().all(|p| p.matches(document)),
            Self::Or(items) => items.iter().any(|p| p.matches(document)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, items: &[Predicate], sep: &str| -> fmt::Result {
            f.write_str("(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{item}")?;
            }
            f.write_str(")")
        };
        match self {
            Self::True => f.write_str("TRUE"),
            Self::False => f.write_str("FALSE"),
            Self::Eq { field, value } => write!(f, "{} == {value}", field.key()),
            Self::Ne { field, value } => write!(f, "{} != {value}", field.key()),
            Self::In { field, values } => {
                write!(f, "{} in {}", field.key(), Value::Array(values.clone()))
            }
            Self::NotIn { field, values } => {
                write!(f, "{} not in {}", field.key(), Value::Array(values.clone()))
            }
            Self::Exists { field } => write!(f, "{} exists", field.key()),
            Self::NotExists { field } => write!(f, "{} not exists", field.key()),
            Self::Range { field, op, value } => {
                write!(f, "{} {} {value}", field.key(), op.as_str())
            }
            Self::And(items) => join(f, items, "AND"),
            Self::Or(items) => join(f, items, "OR"),
        }
    }
}

// =============================================================================
// Lowering
// =============================================================================

/// A construct that cannot be expressed over document fields alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsupported {
    pub reason: String,
}

impl Unsupported {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Lower one rule for a given user.
///
/// Returns [`Predicate::False`] when the rule cannot grant this user anything.
pub fn lower_rule(rule: &Rule, user: &UserContext) -> Result<Predicate, Unsupported> {
    let allow = rule.allow();
    if allow.is_empty() || !allow.identity_passes(user) {
        return Ok(Predicate::False);
    }

    let mut parts = Vec::with_capacity(rule.match_entries().len() + allow.conditions().len());
    for entry in rule.match_entries() {
        let expected = entry.expected();
        if expected.is_array() {
            return Err(Unsupported::new(format!(
                "list-valued match entry for '{}'",
                entry.field().key()
            )));
        }
        parts.push(Predicate::Eq {
            field: entry.field().clone(),
            value: expected.clone(),
        });
    }

    let conditions = allow
        .conditions()
        .iter()
        .map(|condition| lower_expr(condition.expr(), user))
        .collect();
    parts.push(fold_and(conditions)?);

    Ok(Predicate::and(parts))
}

/// Lower a condition expression for a given user.
pub fn lower_expr(expr: &Expr, user: &UserContext) -> Result<Predicate, Unsupported> {
    match expr {
        Expr::And(items) => fold_and(items.iter().map(|e| lower_expr(e, user)).collect()),
        Expr::Or(items) => fold_or(items.iter().map(|e| lower_expr(e, user)).collect()),
        Expr::Exists { field, negated } => match field.scope() {
            Scope::Document => Ok(if *negated {
                Predicate::NotExists {
                    field: field.clone(),
                }
            } else {
                Predicate::Exists {
                    field: field.clone(),
                }
            }),
            Scope::User => {
                let present = value::exists(Resolved::lookup(user, field.segments()));
                Ok(Predicate::constant(present != *negated))
            }
        },
        Expr::Compare { left, op, right } => lower_compare(left, *op, right, user),
    }
}

// A false conjunct decides the conjunction even next to an unsupported sibling.
fn fold_and(parts: Vec<Result<Predicate, Unsupported>>) -> Result<Predicate, Unsupported> {
    if parts.iter().any(|p| matches!(p, Ok(Predicate::False))) {
        return Ok(Predicate::False);
    }
    Ok(Predicate::and(parts.into_iter().collect::<Result<Vec<_>, _>>()?))
}

fn fold_or(parts: Vec<Result<Predicate, Unsupported>>) -> Result<Predicate, Unsupported> {
    if parts.iter().any(|p| matches!(p, Ok(Predicate::True))) {
        return Ok(Predicate::True);
    }
    Ok(Predicate::or(parts.into_iter().collect::<Result<Vec<_>, _>>()?))
}

enum Side<'a> {
    Document(&'a FieldPath),
    Known(Resolved<'a>),
}

fn side<'a>(operand: &'a Operand, user: &'a UserContext) -> Side<'a> {
    match operand {
        Operand::Field(path) if path.scope() == Scope::Document => Side::Document(path),
        Operand::Field(path) => Side::Known(Resolved::lookup(user, path.segments())),
        Operand::Literal(value) => Side::Known(Resolved::Value(value)),
        Operand::List(items) => Side::Known(Resolved::List(items)),
    }
}

fn lower_compare(
    left: &Operand,
    op: CompareOp,
    right: &Operand,
    user: &UserContext,
) -> Result<Predicate, Unsupported> {
    match (side(left, user), side(right, user)) {
        (Side::Known(l), Side::Known(r)) => compare(op, l, r)
            .map(Predicate::constant)
            .map_err(|_| Unsupported::new("user value nesting too deep")),
        (Side::Document(a), Side::Document(b)) => Err(Unsupported::new(format!(
            "comparison between document fields '{}' and '{}'",
            a.key(),
            b.key()
        ))),
        (Side::Document(field), Side::Known(known)) => field_vs_known(field, op, known),
        (Side::Known(known), Side::Document(field)) => field_vs_known(field, op.flipped(), known),
    }
}

fn field_vs_known(
    field: &FieldPath,
    op: CompareOp,
    known: Resolved<'_>,
) -> Result<Predicate, Unsupported> {
    match op {
        CompareOp::Eq | CompareOp::Ne => {
            let negated = op == CompareOp::Ne;
            if known.is_absent() {
                return Ok(Predicate::constant(negated));
            }
            if known.as_array().is_some() {
                return Err(Unsupported::new(format!(
                    "list value compared with '{op}' against '{}'",
                    field.key()
                )));
            }
            let Resolved::Value(value) = known else {
                return Ok(Predicate::constant(negated));
            };
            if !value::is_scalar(value) {
                return Ok(Predicate::constant(negated));
            }
            let field = field.clone();
            let value = value.clone();
            Ok(if negated {
                Predicate::Ne { field, value }
            } else {
                Predicate::Eq { field, value }
            })
        }
        CompareOp::In | CompareOp::NotIn => {
            let negated = op == CompareOp::NotIn;
            let mut values: Vec<Value> = Vec::new();
            for element in known.elements() {
                if value::is_scalar(element) && !values.contains(element) {
                    values.push(element.clone());
                }
            }
            if values.is_empty() {
                return Ok(Predicate::constant(negated));
            }
            let field = field.clone();
            Ok(if negated {
                Predicate::NotIn { field, values }
            } else {
                Predicate::In { field, values }
            })
        }
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            let Some(range_op) = RangeOp::from_compare(op) else {
                return Ok(Predicate::False);
            };
            if known.is_absent() {
                return Ok(Predicate::False);
            }
            if known.as_array().is_some() {
                return Err(Unsupported::new(format!(
                    "list value in range comparison against '{}'",
                    field.key()
                )));
            }
            match known {
                Resolved::Value(value) if value.is_number() => Ok(Predicate::Range {
                    field: field.clone(),
                    op: range_op,
                    value: value.clone(),
                }),
                _ => Ok(Predicate::False),
            }
        }
    }
}
