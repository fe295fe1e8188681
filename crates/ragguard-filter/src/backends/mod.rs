//! Native filter builders for vector stores.
//!
//! Each builder turns a folded [`Predicate`] into the filter language of one
//! store. Builders receive predicates with no nested constants; the compiler
//! resolves `TRUE`/`FALSE` to [`NativeFilter::MatchAll`] and
//! [`NativeFilter::MatchNone`] before a builder is called.

use std::fmt;

use ragguard_policy::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FilterCompilationError, FilterResult};
use crate::predicate::{Predicate, RangeOp};

pub mod chromadb;
pub mod pgvector;
pub mod pinecone;
pub mod qdrant;
pub mod weaviate;

pub use chromadb::ChromaFilterBuilder;
pub use pgvector::{PgvectorFilterBuilder, SqlCondition, SqlFilter, SqlValue};
pub use pinecone::PineconeFilterBuilder;
pub use qdrant::QdrantFilterBuilder;
pub use weaviate::WeaviateFilterBuilder;

/// Supported vector stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Qdrant,
    Pgvector,
    Pinecone,
    Chromadb,
    Weaviate,
}

impl Backend {
    /// Every backend, in a stable order.
    pub const ALL: [Backend; 5] = [
        Backend::Qdrant,
        Backend::Pgvector,
        Backend::Pinecone,
        Backend::Chromadb,
        Backend::Weaviate,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qdrant => "qdrant",
            Self::Pgvector => "pgvector",
            Self::Pinecone => "pinecone",
            Self::Chromadb => "chromadb",
            Self::Weaviate => "weaviate",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filter ready to hand to a vector store client.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeFilter {
    /// No restriction: query without a filter.
    MatchAll,
    /// Nothing is visible: skip the query and return no results.
    MatchNone,
    /// JSON filter document (Qdrant, Pinecone, ChromaDB, Weaviate).
    Json { backend: Backend, filter: Value },
    /// Parameterized SQL predicate (pgvector).
    Sql(SqlFilter),
}

impl NativeFilter {
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::MatchAll)
    }

    #[must_use]
    pub fn is_match_none(&self) -> bool {
        matches!(self, Self::MatchNone)
    }

    /// The JSON filter document, if this is one.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json { filter, .. } => Some(filter),
            _ => None,
        }
    }

    /// The SQL predicate, if this is one.
    #[must_use]
    pub fn as_sql(&self) -> Option<&SqlFilter> {
        match self {
            Self::Sql(filter) => Some(filter),
            _ => None,
        }
    }
}

impl fmt::Display for NativeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchAll => f.write_str("<match all>"),
            Self::MatchNone => f.write_str("<match none>"),
            Self::Json { filter, .. } => write!(f, "{filter}"),
            Self::Sql(sql) => {
                write!(f, "{}", sql.sql)?;
                if !sql.params.is_empty() {
                    let params: Vec<String> =
                        sql.params.iter().map(SqlValue::as_display_str).collect();
                    write!(f, " -- params: [{}]", params.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

/// What a backend's filter language can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Dotted paths into nested metadata objects.
    pub nested_fields: bool,
    /// Field presence tests that treat `null` and `[]` as absent.
    pub exists: bool,
    /// `!=` and `not in` can select documents that lack the field.
    pub negation_matches_missing: bool,
}

/// Translates predicates into one backend's native filter format.
pub trait FilterBuilder: Send + Sync {
    fn backend(&self) -> Backend;

    fn capabilities(&self) -> Capabilities;

    /// Explain why `predicate` cannot be built, if it cannot.
    fn check(&self, predicate: &Predicate) -> Result<(), String> {
        let backend = self.backend();
        let caps = self.capabilities();
        predicate.try_for_each_leaf(&mut |leaf| {
            if let Some(field) = leaf.field().filter(|f| !caps.nested_fields && !f.is_flat()) {
                return Err(format!("nested field '{}' is not supported by {backend}", field.key()));
            }
            let existence = matches!(leaf, Predicate::Exists { .. } | Predicate::NotExists { .. });
            if existence && !caps.exists {
                return Err(format!("field existence checks are not supported by {backend}"));
            }
            let negated = matches!(leaf, Predicate::Ne { .. } | Predicate::NotIn { .. });
            if negated && !caps.negation_matches_missing {
                let key = leaf.field().map_or("", FieldPath::key);
                return Err(format!(
                    "negated comparison on '{key}' cannot match a missing field in {backend}"
                ));
            }
            Ok(())
        })
    }

    /// Build the native filter. `predicate` must contain no constants.
    fn build(&self, predicate: &Predicate) -> FilterResult<NativeFilter>;
}

/// Error for a constant that survived folding into a builder.
pub(crate) fn unexpected_constant(backend: Backend) -> FilterCompilationError {
    FilterCompilationError::TooComplex {
        backend,
        reason: "constant inside filter expression".to_string(),
    }
}

/// Error for a leaf that [`FilterBuilder::check`] rejects.
pub(crate) fn unsupported_leaf(backend: Backend, leaf: &Predicate) -> FilterCompilationError {
    FilterCompilationError::TooComplex {
        backend,
        reason: format!("'{leaf}' has no native form"),
    }
}

// =============================================================================
// Mongo-style operators (Pinecone, ChromaDB)
// =============================================================================

/// `{"field": {"$op": value}}`.
pub(crate) fn mongo_leaf(field: &FieldPath, op: &str, value: Value) -> Value {
    let mut inner = Map::new();
    inner.insert(op.to_string(), value);
    let mut outer = Map::new();
    outer.insert(field.key().to_string(), Value::Object(inner));
    Value::Object(outer)
}

/// `{"$and": [..]}` or `{"$or": [..]}`; a single operand stands alone.
pub(crate) fn mongo_connective(op: &str, mut operands: Vec<Value>) -> Value {
    if operands.len() == 1 {
        return operands.remove(0);
    }
    let mut map = Map::new();
    map.insert(op.to_string(), Value::Array(operands));
    Value::Object(map)
}

pub(crate) fn mongo_range_op(op: RangeOp) -> &'static str {
    match op {
        RangeOp::Gt => "$gt",
        RangeOp::Gte => "$gte",
        RangeOp::Lt => "$lt",
        RangeOp::Lte => "$lte",
    }
}
