//! Pinecone metadata filters.
//!
//! Pinecone metadata is flat: keys are top-level strings, numbers, booleans
//! or lists of strings. Operators on a list field match when any element
//! matches, which is the element-wise semantics predicates use.
//!
//! `$ne` and `$nin` are false for records without the field, so negations
//! add an explicit `{"$exists": false}` branch. `$exists: true` also holds
//! for an empty list, which predicates treat as absent, so existence tests
//! are left to post-filtering.

use ragguard_policy::FieldPath;
use serde_json::Value;

use super::{
    Backend, Capabilities, FilterBuilder, NativeFilter, mongo_connective, mongo_leaf,
    mongo_range_op, unexpected_constant, unsupported_leaf,
};
use crate::error::FilterResult;
use crate::predicate::Predicate;

/// Builds `{"field": {"$eq": ...}}` style filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PineconeFilterBuilder;

impl FilterBuilder for PineconeFilterBuilder {
    fn backend(&self) -> Backend {
        Backend::Pinecone
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            nested_fields: false,
            exists: false,
            negation_matches_missing: true,
        }
    }

    fn build(&self, predicate: &Predicate) -> FilterResult<NativeFilter> {
        Ok(NativeFilter::Json {
            backend: Backend::Pinecone,
            filter: clause(predicate)?,
        })
    }
}

fn clause(predicate: &Predicate) -> FilterResult<Value> {
    Ok(match predicate {
        Predicate::True | Predicate::False => return Err(unexpected_constant(Backend::Pinecone)),
        Predicate::Eq { field, value } => mongo_leaf(field, "$eq", value.clone()),
        Predicate::Ne { field, value } => {
            or_missing(field, mongo_leaf(field, "$ne", value.clone()))
        }
        Predicate::In { field, values } => mongo_leaf(field, "$in", Value::Array(values.clone())),
        Predicate::NotIn { field, values } => {
            or_missing(field, mongo_leaf(field, "$nin", Value::Array(values.clone())))
        }
        Predicate::Range { field, op, value } => {
            mongo_leaf(field, mongo_range_op(*op), value.clone())
        }
        Predicate::Exists { .. } | Predicate::NotExists { .. } => {
            return Err(unsupported_leaf(Backend::Pinecone, predicate));
        }
        Predicate::And(items) => mongo_connective("$and", clauses(items)?),
        Predicate::Or(items) => mongo_connective("$or", clauses(items)?),
    })
}

fn clauses(items: &[Predicate]) -> FilterResult<Vec<Value>> {
    items.iter().map(clause).collect()
}

/// `negated` or the field is not set.
fn or_missing(field: &FieldPath, negated: Value) -> Value {
    mongo_connective("$or", vec![negated, mongo_leaf(field, "$exists", Value::Bool(false))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::RangeOp;
    use assert_json_diff::assert_json_eq;
    use ragguard_policy::{FieldPath, Scope};
    use serde_json::json;

    fn field(key: &str) -> FieldPath {
        FieldPath::new(Scope::Document, key).unwrap()
    }

    fn build(predicate: Predicate) -> serde_json::Value {
        PineconeFilterBuilder
            .build(&predicate)
            .unwrap()
            .as_json()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_leaf_operators() {
        assert_json_eq!(
            build(Predicate::Eq {
                field: field("department"),
                value: json!("eng")
            }),
            json!({"department": {"$eq": "eng"}})
        );
        assert_json_eq!(
            build(Predicate::NotIn {
                field: field("label"),
                values: vec![json!("secret"), json!("top")]
            }),
            json!({"$or": [
                {"label": {"$nin": ["secret", "top"]}},
                {"label": {"$exists": false}}
            ]})
        );
        assert_json_eq!(
            build(Predicate::Range {
                field: field("level"),
                op: RangeOp::Lte,
                value: json!(3)
            }),
            json!({"level": {"$lte": 3}})
        );
    }

    #[test]
    fn test_rules_combine_with_or() {
        let filter = build(Predicate::Or(vec![
            Predicate::Eq {
                field: field("visibility"),
                value: json!("public"),
            },
            Predicate::And(vec![
                Predicate::Eq {
                    field: field("department"),
                    value: json!("eng"),
                },
                Predicate::In {
                    field: field("classification"),
                    values: vec![json!("internal"), json!("confidential")],
                },
            ]),
        ]));
        assert_json_eq!(
            filter,
            json!({"$or": [
                {"visibility": {"$eq": "public"}},
                {"$and": [
                    {"department": {"$eq": "eng"}},
                    {"classification": {"$in": ["internal", "confidential"]}}
                ]}
            ]})
        );
    }

    #[test]
    fn test_not_equal_keeps_records_without_the_field() {
        assert_json_eq!(
            build(Predicate::Ne {
                field: field("status"),
                value: json!("draft")
            }),
            json!({"$or": [
                {"status": {"$ne": "draft"}},
                {"status": {"$exists": false}}
            ]})
        );
    }

    #[test]
    fn test_existence_left_to_post_filter() {
        // `$exists: true` holds for `[]`, which counts as absent.
        let reason = PineconeFilterBuilder
            .check(&Predicate::Exists { field: field("owner") })
            .unwrap_err();
        assert!(reason.contains("existence"));
        assert!(PineconeFilterBuilder
            .build(&Predicate::NotExists { field: field("owner") })
            .is_err());
    }

    #[test]
    fn test_nested_fields_rejected() {
        let predicate = Predicate::Eq {
            field: field("meta.owner"),
            value: json!("a"),
        };
        let reason = PineconeFilterBuilder.check(&predicate).unwrap_err();
        assert!(reason.contains("nested field 'meta.owner'"));
    }
}
