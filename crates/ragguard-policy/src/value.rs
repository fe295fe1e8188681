//! Value semantics shared by the evaluation engine and the filter compiler.
//!
//! User contexts and documents are plain JSON objects. A field path that does
//! not resolve, or resolves to `null`, is *absent*; an empty array counts as
//! absent for existence checks. Comparisons never coerce across kinds except
//! that integers and floats form a single numeric kind.
//!
//! | left \ right  | absent | scalar            | array                  |
//! |---------------|--------|-------------------|------------------------|
//! | absent        | false  | false             | false                  |
//! | scalar        | false  | scalar equality   | any element equal      |
//! | array         | false  | any element equal | structural equality    |

use std::cmp::Ordering;

use serde_json::{Map, Value};

/// A user context: an ordered JSON object (`id`, `roles`, arbitrary attributes).
pub type UserContext = Map<String, Value>;

/// Document metadata: an ordered JSON object.
pub type Document = Map<String, Value>;

/// Maximum array nesting descended by structural equality.
pub const MAX_VALUE_DEPTH: usize = 32;

/// Marker for a structural comparison that exceeded [`MAX_VALUE_DEPTH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthExceeded;

// =============================================================================
// Resolution
// =============================================================================

/// The result of resolving one side of a comparison.
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    /// The path does not exist.
    Missing,
    /// A value from the user context, the document, or a scalar literal.
    Value(&'a Value),
    /// A list literal.
    List(&'a [Value]),
}

impl<'a> Resolved<'a> {
    /// Resolve a pre-split path against a JSON object.
    pub fn lookup(root: &'a Map<String, Value>, segments: &[String]) -> Self {
        let Some((first, rest)) = segments.split_first() else {
            return Self::Missing;
        };
        let mut current = match root.get(first) {
            Some(value) => value,
            None => return Self::Missing,
        };
        for segment in rest {
            current = match current {
                Value::Object(map) => match map.get(segment) {
                    Some(value) => value,
                    None => return Self::Missing,
                },
                _ => return Self::Missing,
            };
        }
        Self::Value(current)
    }

    /// `true` when missing or `null`.
    #[must_use]
    pub fn is_null_or_missing(&self) -> bool {
        matches!(self, Self::Missing | Self::Value(Value::Null))
    }

    /// `true` when missing, `null`, or an empty array (or empty list literal).
    #[must_use]
    pub fn is_absent(&self) -> bool {
        match self {
            Self::Missing | Self::Value(Value::Null) => true,
            Self::Value(Value::Array(items)) => items.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Value(_) => false,
        }
    }

    /// The array view, if this side is an array or a list literal.
    #[must_use]
    pub fn as_array(&self) -> Option<&'a [Value]> {
        match *self {
            Self::Value(Value::Array(items)) => Some(items.as_slice()),
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Elements used for element-wise matching: a scalar yields itself,
    /// arrays yield their items, absent values yield nothing.
    #[must_use]
    pub fn elements(&self) -> &'a [Value] {
        match *self {
            Self::Missing | Self::Value(Value::Null) => &[],
            Self::Value(Value::Array(items)) => items.as_slice(),
            Self::Value(value) => std::slice::from_ref(value),
            Self::List(items) => items,
        }
    }

    /// Owned copy of the resolved value, `None` when missing.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Missing => None,
            Self::Value(value) => Some((*value).clone()),
            Self::List(items) => Some(Value::Array(items.to_vec())),
        }
    }
}

/// `true` for strings, numbers and booleans.
#[must_use]
pub fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Human-readable kind name used in diagnostics.
#[must_use]
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Comparison primitives
// =============================================================================

/// Equality between two scalars. `null`, arrays and objects never compare equal.
#[must_use]
pub fn scalar_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(_), Value::Number(_)) => {
            compare_numbers(left, right) == Some(Ordering::Equal)
        }
        _ => false,
    }
}

/// Numeric ordering, `None` unless both values are numbers.
#[must_use]
pub fn compare_numbers(left: &Value, right: &Value) -> Option<Ordering> {
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return None;
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

fn deep_eq(left: &Value, right: &Value, depth: usize) -> Result<bool, DepthExceeded> {
    if depth > MAX_VALUE_DEPTH {
        return Err(DepthExceeded);
    }
    match (left, right) {
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (x, y) in a.iter().zip(b) {
                if !deep_eq(x, y, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(scalar_eq(left, right)),
    }
}

/// `==` semantics: absent sides never match, array against array is
/// structural, anything else matches element-wise.
pub fn equals(left: Resolved<'_>, right: Resolved<'_>) -> Result<bool, DepthExceeded> {
    if left.is_absent() || right.is_absent() {
        return Ok(false);
    }
    if let (Some(a), Some(b)) = (left.as_array(), right.as_array()) {
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b) {
            if !deep_eq(x, y, 1)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    Ok(any_pair(left, right, scalar_eq))
}

/// `in` semantics: the flattened operands share at least one element.
#[must_use]
pub fn membership(left: Resolved<'_>, right: Resolved<'_>) -> bool {
    any_pair(left, right, scalar_eq)
}

/// Range semantics: some numeric element pair satisfies the ordering.
#[must_use]
pub fn range_holds(left: Resolved<'_>, right: Resolved<'_>, accept: fn(Ordering) -> bool) -> bool {
    any_pair(left, right, |a, b| compare_numbers(a, b).is_some_and(accept))
}

/// `exists` semantics: present, non-null and not an empty array.
#[must_use]
pub fn exists(value: Resolved<'_>) -> bool {
    !value.is_absent()
}

fn any_pair(
    left: Resolved<'_>,
    right: Resolved<'_>,
    pred: impl Fn(&Value, &Value) -> bool,
) -> bool {
    let rights = right.elements();
    left.elements()
        .iter()
        .any(|l| rights.iter().any(|r| pred(l, r)))
}

/// Extract role names from a user's `roles` attribute (string or list of strings).
#[must_use]
pub fn role_names(user: &UserContext) -> Vec<&str> {
    match user.get("roles") {
        Some(Value::String(role)) => vec![role.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}
