//! ChromaDB `where` filters.
//!
//! Same operator vocabulary as Pinecone without `$exists`. `$and` and `$or`
//! require at least two operands, which folded predicates already guarantee.
//!
//! Chroma compares `$eq` and `$in` type-strictly, so `5` never equals a stored
//! `5.0`; numeric equality is written as a closed `$gte`/`$lte` range instead.
//! `$ne` and `$nin` skip records without the field and there is no way to
//! select those records, so negations are left to post-filtering.

use ragguard_policy::FieldPath;
use serde_json::Value;

use super::{
    Backend, Capabilities, FilterBuilder, NativeFilter, mongo_connective, mongo_leaf,
    mongo_range_op, unexpected_constant, unsupported_leaf,
};
use crate::error::FilterResult;
use crate::predicate::Predicate;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromaFilterBuilder;

impl FilterBuilder for ChromaFilterBuilder {
    fn backend(&self) -> Backend {
        Backend::Chromadb
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            nested_fields: false,
            exists: false,
            negation_matches_missing: false,
        }
    }

    fn build(&self, predicate: &Predicate) -> FilterResult<NativeFilter> {
        Ok(NativeFilter::Json {
            backend: Backend::Chromadb,
            filter: clause(predicate)?,
        })
    }
}

fn clause(predicate: &Predicate) -> FilterResult<Value> {
    Ok(match predicate {
        Predicate::True | Predicate::False => return Err(unexpected_constant(Backend::Chromadb)),
        Predicate::Eq { field, value } => equals(field, value),
        Predicate::In { field, values } => equals_any(field, values),
        Predicate::Range { field, op, value } => {
            mongo_leaf(field, mongo_range_op(*op), value.clone())
        }
        Predicate::Ne { .. }
        | Predicate::NotIn { .. }
        | Predicate::Exists { .. }
        | Predicate::NotExists { .. } => return Err(unsupported_leaf(Backend::Chromadb, predicate)),
        Predicate::And(items) => mongo_connective("$and", clauses(items)?),
        Predicate::Or(items) => mongo_connective("$or", clauses(items)?),
    })
}

fn clauses(items: &[Predicate]) -> FilterResult<Vec<Value>> {
    items.iter().map(clause).collect()
}

fn equals(field: &FieldPath, value: &Value) -> Value {
    if value.is_number() {
        mongo_connective(
            "$and",
            vec![
                mongo_leaf(field, "$gte", value.clone()),
                mongo_leaf(field, "$lte", value.clone()),
            ],
        )
    } else {
        mongo_leaf(field, "$eq", value.clone())
    }
}

/// Strings share one `$in`; every other value gets its own equality.
fn equals_any(field: &FieldPath, values: &[Value]) -> Value {
    let (strings, others): (Vec<&Value>, Vec<&Value>) = values.iter().partition(|v| v.is_string());
    let mut operands = Vec::with_capacity(others.len() + 1);
    if !strings.is_empty() {
        let strings = strings.into_iter().cloned().collect();
        operands.push(mongo_leaf(field, "$in", Value::Array(strings)));
    }
    operands.extend(others.into_iter().map(|value| equals(field, value)));
    mongo_connective("$or", operands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use ragguard_policy::{FieldPath, Scope};
    use serde_json::json;

    fn field(key: &str) -> FieldPath {
        FieldPath::new(Scope::Document, key).unwrap()
    }

    #[test]
    fn test_and_of_leaves() {
        let filter = ChromaFilterBuilder
            .build(&Predicate::And(vec![
                Predicate::Eq {
                    field: field("team"),
                    value: json!("search"),
                },
                Predicate::In {
                    field: field("status"),
                    values: vec![json!("draft"), json!("final")],
                },
            ]))
            .unwrap();
        assert_json_eq!(
            filter.as_json().cloned().unwrap(),
            json!({"$and": [
                {"team": {"$eq": "search"}},
                {"status": {"$in": ["draft", "final"]}}
            ]})
        );
    }

    #[test]
    fn test_numeric_equality_matches_int_and_float() {
        let filter = ChromaFilterBuilder
            .build(&Predicate::In {
                field: field("tier"),
                values: vec![json!("gold"), json!(1), json!(true)],
            })
            .unwrap();
        assert_json_eq!(
            filter.as_json().cloned().unwrap(),
            json!({"$or": [
                {"tier": {"$in": ["gold"]}},
                {"$and": [{"tier": {"$gte": 1}}, {"tier": {"$lte": 1}}]},
                {"tier": {"$eq": true}}
            ]})
        );
    }

    #[test]
    fn test_negation_rejected() {
        let reason = ChromaFilterBuilder
            .check(&Predicate::Ne {
                field: field("status"),
                value: json!("archived"),
            })
            .unwrap_err();
        assert!(reason.contains("missing field"));
        let not_in = Predicate::NotIn {
            field: field("status"),
            values: vec![json!("archived")],
        };
        assert!(ChromaFilterBuilder.check(&not_in).is_err());
        assert!(ChromaFilterBuilder.build(&not_in).is_err());
    }

    #[test]
    fn test_existence_rejected() {
        let reason = ChromaFilterBuilder
            .check(&Predicate::Exists { field: field("owner") })
            .unwrap_err();
        assert!(reason.contains("existence"));
        assert!(reason.contains("chromadb"));
    }

    #[test]
    fn test_constants_never_reach_builder() {
        assert!(ChromaFilterBuilder.build(&Predicate::True).is_err());
    }
}
