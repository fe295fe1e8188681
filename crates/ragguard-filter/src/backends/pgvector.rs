//! pgvector SQL predicates over a JSONB metadata column.
//!
//! The builder produces a [`SqlCondition`] tree and renders it into a
//! parameterized `WHERE` fragment. Values never appear in the SQL text; path
//! segments are validated identifiers.
//!
//! Rendering rules (`acc` is the JSONB accessor, e.g. `metadata->'team'`):
//!
//! | condition      | SQL                                                          |
//! |----------------|--------------------------------------------------------------|
//! | equality       | `acc @> $1::jsonb` (a scalar is contained in a matching array) |
//! | membership     | one containment test per value, joined with `OR`             |
//! | present        | `acc IS NOT NULL AND acc <> 'null' AND acc <> '[]'`          |
//! | numeric range  | `EXISTS` over the numeric elements of `acc`                  |
//! | negation       | `NOT COALESCE(..., FALSE)` so missing fields negate to true  |

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{Backend, Capabilities, FilterBuilder, NativeFilter, unexpected_constant};
use crate::error::{FilterCompilationError, FilterResult};
use crate::predicate::{Predicate, RangeOp};

static IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("identifier regex should compile")
});

/// Validate an identifier (column name, path segment).
fn validate_identifier(name: &str) -> FilterResult<()> {
    if IDENTIFIER_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(FilterCompilationError::InvalidIdentifier(name.to_string()))
    }
}

// ============================================================================
// Values and paths
// ============================================================================

/// Bind parameter values.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// JSON text, bound as `jsonb`.
    Json(String),
}

impl SqlValue {
    /// Get the value as a string for display/debugging.
    #[must_use]
    pub fn as_display_str(&self) -> String {
        match self {
            Self::Text(s) | Self::Json(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(b) => b.to_string(),
        }
    }

    fn numeric(value: &Value) -> Self {
        match value.as_i64() {
            Some(i) => Self::Integer(i),
            None => Self::Float(value.as_f64().unwrap_or(f64::NAN)),
        }
    }
}

/// A validated path into the metadata column.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonbPath {
    segments: Vec<String>,
}

impl JsonbPath {
    pub fn new(segments: &[String]) -> FilterResult<Self> {
        for segment in segments {
            validate_identifier(segment)?;
        }
        Ok(Self {
            segments: segments.to_vec(),
        })
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// `column->'a'->'b'` (always JSONB, never text).
    #[must_use]
    pub fn to_accessor(&self, column: &str) -> String {
        self.segments
            .iter()
            .fold(column.to_string(), |acc, segment| format!("{acc}->'{segment}'"))
    }
}

// ============================================================================
// Condition tree
// ============================================================================

/// A SQL condition over the metadata column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlCondition {
    /// `acc @> value`.
    Contains { path: JsonbPath, value: Value },
    /// Any of several containments.
    ContainsAny { path: JsonbPath, values: Vec<Value> },
    /// Present, non-null, not an empty array.
    Present { path: JsonbPath },
    /// Missing, `null` or an empty array.
    Absent { path: JsonbPath },
    /// Some numeric element compares to `value`.
    Numeric {
        path: JsonbPath,
        op: RangeOp,
        value: Value,
    },
    /// Negation treating `NULL` as false.
    Not(Box<SqlCondition>),
    And(Vec<SqlCondition>),
    Or(Vec<SqlCondition>),
}

impl SqlCondition {
    /// Translate a folded predicate.
    pub fn from_predicate(predicate: &Predicate) -> FilterResult<Self> {
        let path = |field: &ragguard_policy::FieldPath| JsonbPath::new(field.segments());
        Ok(match predicate {
            Predicate::True | Predicate::False => {
                return Err(unexpected_constant(Backend::Pgvector));
            }
            Predicate::Eq { field, value } => Self::Contains {
                path: path(field)?,
                value: value.clone(),
            },
            Predicate::Ne { field, value } => Self::Not(Box::new(Self::Contains {
                path: path(field)?,
                value: value.clone(),
            })),
            Predicate::In { field, values } => Self::ContainsAny {
                path: path(field)?,
                values: values.clone(),
            },
            Predicate::NotIn { field, values } => Self::Not(Box::new(Self::ContainsAny {
                path: path(field)?,
                values: values.clone(),
            })),
            Predicate::Exists { field } => Self::Present { path: path(field)? },
            Predicate::NotExists { field } => Self::Absent { path: path(field)? },
            Predicate::Range { field, op, value } => Self::Numeric {
                path: path(field)?,
                op: *op,
                value: value.clone(),
            },
            Predicate::And(items) => Self::And(
                items
                    .iter()
                    .map(Self::from_predicate)
                    .collect::<FilterResult<_>>()?,
            ),
            Predicate::Or(items) => Self::Or(
                items
                    .iter()
                    .map(Self::from_predicate)
                    .collect::<FilterResult<_>>()?,
            ),
        })
    }

    fn to_sql(&self, column: &str, offset: usize, params: &mut Vec<SqlValue>) -> String {
        let mut bind = |value: SqlValue| {
            params.push(value);
            format!("${}", offset + params.len())
        };
        match self {
            Self::Contains { path, value } => {
                let param = bind(SqlValue::Json(value.to_string()));
                format!("({} @> {param}::jsonb)", path.to_accessor(column))
            }
            Self::ContainsAny { path, values } => {
                let accessor = path.to_accessor(column);
                let parts: Vec<String> = values
                    .iter()
                    .map(|value| {
                        let param = bind(SqlValue::Json(value.to_string()));
                        format!("{accessor} @> {param}::jsonb")
                    })
                    .collect();
                format!("({})", parts.join(" OR "))
            }
            Self::Present { path } => {
                let acc = path.to_accessor(column);
                format!("({acc} IS NOT NULL AND {acc} <> 'null'::jsonb AND {acc} <> '[]'::jsonb)")
            }
            Self::Absent { path } => {
                let acc = path.to_accessor(column);
                format!("({acc} IS NULL OR {acc} = 'null'::jsonb OR {acc} = '[]'::jsonb)")
            }
            Self::Numeric { path, op, value } => {
                let acc = path.to_accessor(column);
                let param = bind(SqlValue::numeric(value));
                format!(
                    "(EXISTS (SELECT 1 FROM jsonb_array_elements(CASE WHEN jsonb_typeof({acc}) = 'array' THEN {acc} ELSE jsonb_build_array({acc}) END) AS elem WHERE jsonb_typeof(elem) = 'number' AND (elem #>> '{{}}')::numeric {} {param}))",
                    op.as_str()
                )
            }
            Self::Not(inner) => {
                let inner = inner.to_sql(column, offset, params);
                format!("(NOT COALESCE({inner}, FALSE))")
            }
            Self::And(items) => join(items, " AND ", column, offset, params),
            Self::Or(items) => join(items, " OR ", column, offset, params),
        }
    }
}

fn join(
    items: &[SqlCondition],
    sep: &str,
    column: &str,
    offset: usize,
    params: &mut Vec<SqlValue>,
) -> String {
    let parts: Vec<String> = items.iter().map(|c| c.to_sql(column, offset, params)).collect();
    format!("({})", parts.join(sep))
}

/// A rendered predicate: SQL fragment plus bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    /// Source tree.
    pub condition: SqlCondition,
    /// `WHERE`-ready fragment with `$n` placeholders.
    pub sql: String,
    /// Parameters for `$offset+1..`.
    pub params: Vec<SqlValue>,
}

// ============================================================================
// Builder
// ============================================================================

/// Builds pgvector filters against one JSONB column.
#[derive(Debug, Clone)]
pub struct PgvectorFilterBuilder {
    column: String,
    param_offset: usize,
}

impl PgvectorFilterBuilder {
    pub fn new(column: &str, param_offset: usize) -> Self {
        Self {
            column: column.to_string(),
            param_offset,
        }
    }
}

impl Default for PgvectorFilterBuilder {
    fn default() -> Self {
        Self::new("metadata", 0)
    }
}

impl FilterBuilder for PgvectorFilterBuilder {
    fn backend(&self) -> Backend {
        Backend::Pgvector
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            nested_fields: true,
            exists: true,
            negation_matches_missing: true,
        }
    }

    fn build(&self, predicate: &Predicate) -> FilterResult<NativeFilter> {
        validate_identifier(&self.column)?;
        let condition = SqlCondition::from_predicate(predicate)?;
        let mut params = Vec::new();
        let sql = condition.to_sql(&self.column, self.param_offset, &mut params);
        Ok(NativeFilter::Sql(SqlFilter {
            condition,
            sql,
            params,
        }))
    }
}
