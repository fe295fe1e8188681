//! Qdrant payload filters.
//!
//! Output follows the REST `Filter` schema: `must` for conjunction, `should`
//! for disjunction, `must_not` for negation. Conditions on array payloads
//! match when any element matches. `is_empty` matches missing, `null` and `[]`
//! fields, the same notion of absence predicates use.

use serde_json::{Map, Value, json};

use super::{Backend, Capabilities, FilterBuilder, NativeFilter, unexpected_constant};
use crate::error::FilterResult;
use crate::predicate::{Predicate, RangeOp};

#[derive(Debug, Clone, Copy, Default)]
pub struct QdrantFilterBuilder;

impl FilterBuilder for QdrantFilterBuilder {
    fn backend(&self) -> Backend {
        Backend::Qdrant
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            nested_fields: true,
            exists: true,
            negation_matches_missing: true,
        }
    }

    fn build(&self, predicate: &Predicate) -> FilterResult<NativeFilter> {
        let condition = condition(predicate)?;
        let filter = if is_filter(&condition) {
            condition
        } else {
            json!({ "must": [condition] })
        };
        Ok(NativeFilter::Json {
            backend: Backend::Qdrant,
            filter,
        })
    }
}

/// A nested `Filter` object rather than a field condition.
fn is_filter(condition: &Value) -> bool {
    condition
        .as_object()
        .is_some_and(|map| ["must", "should", "must_not"].iter().any(|k| map.contains_key(*k)))
}

fn condition(predicate: &Predicate) -> FilterResult<Value> {
    Ok(match predicate {
        Predicate::True | Predicate::False => return Err(unexpected_constant(Backend::Qdrant)),
        Predicate::Eq { field, value } => equals(field.key(), value),
        Predicate::Ne { field, value } => json!({ "must_not": [equals(field.key(), value)] }),
        Predicate::In { field, values } => equals_any(field.key(), values),
        Predicate::NotIn { field, values } => {
            json!({ "must_not": [equals_any(field.key(), values)] })
        }
        Predicate::Exists { field } => {
            json!({ "must_not": [{ "is_empty": { "key": field.key() } }] })
        }
        Predicate::NotExists { field } => json!({ "is_empty": { "key": field.key() } }),
        Predicate::Range { field, op, value } => {
            let bound = match op {
                RangeOp::Gt => "gt",
                RangeOp::Gte => "gte",
                RangeOp::Lt => "lt",
                RangeOp::Lte => "lte",
            };
            let mut range = Map::new();
            range.insert(bound.to_string(), value.clone());
            json!({ "key": field.key(), "range": range })
        }
        Predicate::And(items) => json!({ "must": conditions(items)? }),
        Predicate::Or(items) => json!({ "should": conditions(items)? }),
    })
}

fn conditions(items: &[Predicate]) -> FilterResult<Vec<Value>> {
    items.iter().map(condition).collect()
}

/// `match` is type-strict, so an integer never matches a stored `5.0`;
/// numbers use a closed range, which compares across integer and float.
fn equals(key: &str, value: &Value) -> Value {
    if value.is_number() {
        json!({ "key": key, "range": { "gte": value, "lte": value } })
    } else {
        json!({ "key": key, "match": { "value": value } })
    }
}

/// Keywords share one `match.any`; every other value gets its own equality.
fn equals_any(key: &str, values: &[Value]) -> Value {
    let (keywords, others): (Vec<&Value>, Vec<&Value>) = values.iter().partition(|v| v.is_string());
    let mut options = Vec::with_capacity(others.len() + 1);
    if !keywords.is_empty() {
        options.push(json!({ "key": key, "match": { "any": keywords } }));
    }
    options.extend(others.into_iter().map(|value| equals(key, value)));
    if options.len() == 1 {
        options.remove(0)
    } else {
        json!({ "should": options })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use ragguard_policy::{FieldPath, Scope};

    fn field(key: &str) -> FieldPath {
        FieldPath::new(Scope::Document, key).unwrap()
    }

    fn build(predicate: Predicate) -> Value {
        QdrantFilterBuilder
            .build(&predicate)
            .unwrap()
            .as_json()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_single_leaf_wrapped_in_must() {
        assert_json_eq!(
            build(Predicate::Eq {
                field: field("department"),
                value: json!("eng")
            }),
            json!({"must": [{"key": "department", "match": {"value": "eng"}}]})
        );
    }

    #[test]
    fn test_float_equality_uses_range() {
        assert_json_eq!(
            build(Predicate::Eq {
                field: field("score"),
                value: json!(0.5)
            }),
            json!({"must": [{"key": "score", "range": {"gte": 0.5, "lte": 0.5}}]})
        );
    }

    #[test]
    fn test_membership() {
        assert_json_eq!(
            build(Predicate::In {
                field: field("shared_with"),
                values: vec![json!("alice")]
            }),
            json!({"must": [{"key": "shared_with", "match": {"any": ["alice"]}}]})
        );
        assert_json_eq!(
            build(Predicate::NotIn {
                field: field("code"),
                values: vec![json!("a"), json!(1)]
            }),
            json!({"must_not": [{"should": [
                {"key": "code", "match": {"any": ["a"]}},
                {"key": "code", "range": {"gte": 1, "lte": 1}}
            ]}]})
        );
    }

    #[test]
    fn test_integer_equality_matches_float_payloads() {
        // A payload of {"level": 5.0, "tier": 1.0} must be excluded by both.
        let filter = build(Predicate::Or(vec![
            Predicate::Ne {
                field: field("level"),
                value: json!(5),
            },
            Predicate::NotIn {
                field: field("tier"),
                values: vec![json!(1), json!(2)],
            },
        ]));
        assert_json_eq!(
            filter,
            json!({"should": [
                {"must_not": [{"key": "level", "range": {"gte": 5, "lte": 5}}]},
                {"must_not": [{"should": [
                    {"key": "tier", "range": {"gte": 1, "lte": 1}},
                    {"key": "tier", "range": {"gte": 2, "lte": 2}}
                ]}]}
            ]})
        );
    }

    #[test]
    fn test_existence() {
        assert_json_eq!(
            build(Predicate::Exists { field: field("reviewer") }),
            json!({"must_not": [{"is_empty": {"key": "reviewer"}}]})
        );
        assert_json_eq!(
            build(Predicate::NotExists { field: field("reviewer") }),
            json!({"must": [{"is_empty": {"key": "reviewer"}}]})
        );
    }

    #[test]
    fn test_nested_keys_and_boolean_structure() {
        let filter = build(Predicate::Or(vec![
            Predicate::Eq {
                field: field("meta.visibility"),
                value: json!("public"),
            },
            Predicate::And(vec![
                Predicate::Ne {
                    field: field("status"),
                    value: json!("draft"),
                },
                Predicate::Range {
                    field: field("level"),
                    op: RangeOp::Lt,
                    value: json!(3),
                },
            ]),
        ]));
        assert_json_eq!(
            filter,
            json!({"should": [
                {"key": "meta.visibility", "match": {"value": "public"}},
                {"must": [
                    {"must_not": [{"key": "status", "match": {"value": "draft"}}]},
                    {"key": "level", "range": {"lt": 3}}
                ]}
            ]})
        );
        assert!(QdrantFilterBuilder.check(&Predicate::Exists { field: field("a.b") }).is_ok());
    }
}
