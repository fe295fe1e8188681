//! Hot-swappable policy store and the secure filter service.
//!
//! Readers load the current policy snapshot without locking. A swap replaces
//! the snapshot atomically and invalidates the filter cache; in-flight
//! requests finish against the snapshot they loaded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use ragguard_policy::{
    Document, Explanation, Policy, PolicyDocument, PolicyEngine, PolicyResult, UserContext,
};
use tracing::info;

use crate::backends::{Backend, NativeFilter};
use crate::cache::{CacheStatsSnapshot, FilterCache};
use crate::compiler::{FilterCompiler, FilterExplanation};
use crate::config::GuardConfig;
use crate::error::FilterResult;
use crate::post_filter::{Candidate, PostFilter, PostFilterOutcome};

/// An immutable policy version.
#[derive(Debug)]
pub struct PolicySnapshot {
    policy: Arc<Policy>,
    generation: u64,
}

impl PolicySnapshot {
    #[must_use]
    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    /// Monotonic version number, starting at 1.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holds the active policy behind an `ArcSwap`.
#[derive(Debug)]
pub struct PolicyStore {
    current: ArcSwap<PolicySnapshot>,
    generation: AtomicU64,
    cache: Arc<FilterCache>,
}

impl PolicyStore {
    pub fn new(policy: Policy, cache: Arc<FilterCache>) -> Self {
        Self {
            current: ArcSwap::from_pointee(PolicySnapshot {
                policy: Arc::new(policy),
                generation: 1,
            }),
            generation: AtomicU64::new(1),
            cache,
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    #[must_use]
    pub fn policy(&self) -> Arc<Policy> {
        Arc::clone(&self.current.load().policy)
    }

    /// Replace the active policy and invalidate cached filters.
    ///
    /// Returns the new generation.
    pub fn swap(&self, policy: Policy) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let policy_id = policy.id().to_string();
        let previous = self.current.swap(Arc::new(PolicySnapshot {
            policy: Arc::new(policy),
            generation,
        }));
        self.cache.invalidate();
        info!(
            policy_id = %policy_id,
            previous_policy_id = %previous.policy.id(),
            generation,
            "Policy swapped"
        );
        generation
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<FilterCache> {
        &self.cache
    }
}

/// How a search should be restricted for one user.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchPlan {
    /// Run the query with this filter (or none, for `MatchAll`).
    Native(NativeFilter),
    /// Nothing is visible: return no results without querying.
    Empty,
    /// Over-fetch and authorize each candidate.
    PostFilter { reason: String },
}

/// Policy store, compiler, cache and post-filter behind one entry point.
#[derive(Debug)]
pub struct FilterService {
    store: PolicyStore,
    compiler: FilterCompiler,
    post_filter: PostFilter,
    config: GuardConfig,
}

impl FilterService {
    /// Build the service from an initial policy and configuration.
    pub fn new(policy: Policy, config: GuardConfig) -> Self {
        let cache = Arc::new(FilterCache::from_config(&config.cache));
        Self {
            store: PolicyStore::new(policy, cache),
            compiler: FilterCompiler::new(config.compiler.clone()),
            post_filter: PostFilter::new(config.post_filter.clone()),
            config,
        }
    }

    /// Compile `document` under the configured limits and build the service.
    pub fn from_document(document: &PolicyDocument, config: GuardConfig) -> PolicyResult<Self> {
        let policy = Policy::compile(document, &config.limits)?;
        Ok(Self::new(policy, config))
    }

    #[must_use]
    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    #[must_use]
    pub fn compiler(&self) -> &FilterCompiler {
        &self.compiler
    }

    /// Validate and activate a new policy. The old policy stays active on error.
    pub fn replace_policy(&self, document: &PolicyDocument) -> PolicyResult<u64> {
        let policy = Policy::compile(document, &self.config.limits)?;
        Ok(self.store.swap(policy))
    }

    /// Native filter for `user` on `backend`, served from the cache when possible.
    pub fn filter_for(&self, user: &UserContext, backend: Backend) -> FilterResult<NativeFilter> {
        let snapshot = self.store.snapshot();
        self.store
            .cache()
            .get_or_compile(snapshot.policy(), user, backend, &self.compiler)
    }

    /// Decide how to run a search for `user` on `backend`.
    pub fn plan(&self, user: &UserContext, backend: Backend) -> FilterResult<SearchPlan> {
        match self.filter_for(user, backend) {
            Ok(NativeFilter::MatchNone) => Ok(SearchPlan::Empty),
            Ok(filter) => Ok(SearchPlan::Native(filter)),
            Err(error) if error.requires_post_filter() => Ok(SearchPlan::PostFilter {
                reason: error.to_string(),
            }),
            Err(error) => Err(error),
        }
    }

    /// Per-rule account of the filter for `user` on `backend`.
    #[must_use]
    pub fn explain_filter(&self, user: &UserContext, backend: Backend) -> FilterExplanation {
        self.compiler.explain(self.store.snapshot().policy(), user, backend)
    }

    /// Decide whether `user` may see `document` under the active policy.
    #[must_use]
    pub fn evaluate(&self, user: &UserContext, document: &Document) -> bool {
        PolicyEngine::new(self.store.policy()).evaluate(user, document)
    }

    #[must_use]
    pub fn evaluate_with_explanation(
        &self,
        user: &UserContext,
        document: &Document,
    ) -> Explanation {
        PolicyEngine::new(self.store.policy()).evaluate_with_explanation(user, document)
    }

    /// Authorize candidates retrieved without a native filter.
    pub fn filter_candidates<C, I>(&self, user: &UserContext, candidates: I, limit: usize) -> Vec<C>
    where
        C: Candidate,
        I: IntoIterator<Item = C>,
    {
        self.post_filter
            .filter_candidates(&self.store.policy(), user, candidates, limit)
    }

    /// Over-fetching post-filtered search against the active policy.
    pub fn post_filter_search<C, E, F>(
        &self,
        user: &UserContext,
        limit: usize,
        fetch: F,
    ) -> Result<PostFilterOutcome<C>, E>
    where
        C: Candidate,
        F: FnMut(usize) -> Result<Vec<C>, E>,
    {
        self.post_filter
            .search(&self.store.policy(), user, limit, fetch)
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.store.cache().stats()
    }
}
