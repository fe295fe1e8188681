//! Weaviate `where` filters.
//!
//! Leaves name a property path and carry a typed value (`valueText`,
//! `valueInt`, `valueNumber`, `valueBoolean`). Existence maps to `IsNull`,
//! which requires `indexNullState` on the collection.
//!
//! Text `Equal`, `NotEqual` and `ContainsAny` compare tokens, not whole
//! values. Every text property a policy filters on must be declared with
//! `tokenization: field` so that `"eng team"` matches only `"eng team"` and
//! not `"eng"` or `"Eng Team"`. Objects without the property satisfy
//! `NotEqual`, matching how predicates negate missing fields.

use serde_json::{Map, Value, json};

use super::{Backend, Capabilities, FilterBuilder, NativeFilter, unexpected_constant};
use crate::error::FilterResult;
use crate::predicate::{Predicate, RangeOp};

#[derive(Debug, Clone, Copy, Default)]
pub struct WeaviateFilterBuilder;

impl FilterBuilder for WeaviateFilterBuilder {
    fn backend(&self) -> Backend {
        Backend::Weaviate
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            nested_fields: false,
            exists: true,
            negation_matches_missing: true,
        }
    }

    fn build(&self, predicate: &Predicate) -> FilterResult<NativeFilter> {
        Ok(NativeFilter::Json {
            backend: Backend::Weaviate,
            filter: clause(predicate)?,
        })
    }
}

fn clause(predicate: &Predicate) -> FilterResult<Value> {
    Ok(match predicate {
        Predicate::True | Predicate::False => return Err(unexpected_constant(Backend::Weaviate)),
        Predicate::Eq { field, value } => leaf(field.key(), "Equal", value),
        Predicate::Ne { field, value } => leaf(field.key(), "NotEqual", value),
        Predicate::In { field, values } => contains_any(field.key(), values),
        Predicate::NotIn { field, values } => {
            let operands = values.iter().map(|v| leaf(field.key(), "NotEqual", v)).collect();
            combine("And", operands)
        }
        Predicate::Exists { field } => is_null(field.key(), false),
        Predicate::NotExists { field } => is_null(field.key(), true),
        Predicate::Range { field, op, value } => {
            let operator = match op {
                RangeOp::Gt => "GreaterThan",
                RangeOp::Gte => "GreaterThanEqual",
                RangeOp::Lt => "LessThan",
                RangeOp::Lte => "LessThanEqual",
            };
            leaf(field.key(), operator, value)
        }
        Predicate::And(items) => combine("And", clauses(items)?),
        Predicate::Or(items) => combine("Or", clauses(items)?),
    })
}

fn clauses(items: &[Predicate]) -> FilterResult<Vec<Value>> {
    items.iter().map(clause).collect()
}

fn is_null(key: &str, expected: bool) -> Value {
    json!({"path": [key], "operator": "IsNull", "valueBoolean": expected})
}

fn combine(operator: &str, mut operands: Vec<Value>) -> Value {
    if operands.len() == 1 {
        return operands.remove(0);
    }
    json!({"operator": operator, "operands": operands})
}

/// The typed value key for a scalar.
fn value_key(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "valueBoolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "valueInt",
        Value::Number(_) => "valueNumber",
        _ => "valueText",
    }
}

fn leaf(key: &str, operator: &str, value: &Value) -> Value {
    let mut map = Map::new();
    map.insert("path".to_string(), json!([key]));
    map.insert("operator".to_string(), json!(operator));
    map.insert(value_key(value).to_string(), value.clone());
    Value::Object(map)
}

/// `ContainsAny` takes a homogeneous typed array; mixed lists become an `Or`.
fn contains_any(key: &str, values: &[Value]) -> Value {
    let first = values.first().map_or("valueText", value_key);
    if values.iter().all(|v| value_key(v) == first) {
        let mut map = Map::new();
        map.insert("path".to_string(), json!([key]));
        map.insert("operator".to_string(), json!("ContainsAny"));
        map.insert(format!("{first}Array"), Value::Array(values.to_vec()));
        Value::Object(map)
    } else {
        combine("Or", values.iter().map(|v| leaf(key, "Equal", v)).collect())
    }
}
