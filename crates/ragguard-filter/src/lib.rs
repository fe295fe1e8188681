//! # ragguard-filter
//!
//! Permission-aware vector search on top of [`ragguard_policy`].
//!
//! - **Filter compilation**: a policy plus a user becomes a native filter for
//!   Qdrant, pgvector, Pinecone, ChromaDB or Weaviate ([`FilterCompiler`])
//! - **Filter cache**: compiled filters memoized per policy, compiler
//!   settings, backend and the user attributes the policy reads
//!   ([`FilterCache`])
//! - **Post-filter fallback**: over-fetch and authorize candidates when a
//!   policy cannot be pushed down ([`PostFilter`])
//! - **Hot swap**: lock-free policy replacement with cache invalidation
//!   ([`PolicyStore`], [`FilterService`])
//!
//! A compiled filter never widens access: it selects exactly the documents
//! the evaluation engine would allow, or compilation fails with
//! [`FilterCompilationError::RequiresPostFilter`].
//!
//! ```ignore
//! use ragguard_filter::{Backend, FilterService, GuardConfig, SearchPlan};
//!
//! let service = FilterService::new(policy, GuardConfig::default());
//! match service.plan(&user, Backend::Qdrant)? {
//!     SearchPlan::Native(filter) => qdrant.search_with_filter(query, filter),
//!     SearchPlan::Empty => vec![],
//!     SearchPlan::PostFilter { .. } => {
//!         service.post_filter_search(&user, 10, |n| qdrant.search(query, n))?
//!     }
//! }
//! ```

pub mod backends;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod post_filter;
pub mod predicate;
pub mod store;

pub use backends::{
    Backend, Capabilities, FilterBuilder, NativeFilter, SqlCondition, SqlFilter, SqlValue,
};
pub use cache::{CacheStatsSnapshot, FilterCache};
pub use compiler::{FilterCompiler, FilterExplanation, RuleFilterTrace, RuleOutcome};
pub use config::{
    CacheConfig, CacheKeyStrategy, CompilerConfig, GuardConfig, PostFilterConfig,
    UnsupportedStrategy,
};
pub use error::{ConfigError, FilterCompilationError, FilterResult};
pub use post_filter::{Candidate, PostFilter, PostFilterOutcome, ScoredDocument};
pub use predicate::{Predicate, RangeOp};
pub use store::{FilterService, PolicySnapshot, PolicyStore, SearchPlan};
