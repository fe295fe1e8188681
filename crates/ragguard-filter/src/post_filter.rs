//! Post-filter fallback.
//!
//! When a policy cannot be pushed down into the vector store, the search runs
//! unfiltered with an enlarged result window and every candidate is checked
//! with the evaluation engine. Rank order is preserved.
//!
//! ```ignore
//! let post = PostFilter::new(config.post_filter.clone());
//! let outcome = post.search(&policy, &user, 10, |window| store.query(&embedding, window))?;
//! ```

use std::sync::Arc;

use ragguard_policy::{Document, Policy, PolicyEngine, UserContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PostFilterConfig;

/// A search hit that carries document metadata.
pub trait Candidate {
    fn metadata(&self) -> &Document;
}

impl Candidate for Document {
    fn metadata(&self) -> &Document {
        self
    }
}

/// A scored search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub score: f32,
    pub metadata: Document,
}

impl Candidate for ScoredDocument {
    fn metadata(&self) -> &Document {
        &self.metadata
    }
}

/// Result of [`PostFilter::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct PostFilterOutcome<C> {
    /// Authorized candidates in rank order, at most `limit`.
    pub results: Vec<C>,
    /// Fetch rounds performed.
    pub rounds: usize,
    /// Candidates checked in the final round.
    pub examined: usize,
    /// The source returned fewer candidates than requested.
    pub exhausted: bool,
}

impl<C> PostFilterOutcome<C> {
    /// Fewer results than requested even though more may exist.
    #[must_use]
    pub fn is_partial(&self, limit: usize) -> bool {
        self.results.len() < limit && !self.exhausted
    }
}

/// Authorizes retrieved candidates one by one.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    config: PostFilterConfig,
}

impl PostFilter {
    pub fn new(config: PostFilterConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &PostFilterConfig {
        &self.config
    }

    /// Keep the first `limit` candidates the user may see, in input order.
    pub fn filter_candidates<C, I>(
        &self,
        policy: &Arc<Policy>,
        user: &UserContext,
        candidates: I,
        limit: usize,
    ) -> Vec<C>
    where
        C: Candidate,
        I: IntoIterator<Item = C>,
    {
        let engine = PolicyEngine::new(Arc::clone(policy));
        let mut allowed = Vec::with_capacity(limit.min(64));
        if limit == 0 {
            return allowed;
        }
        for candidate in candidates {
            if engine.evaluate(user, candidate.metadata()) {
                allowed.push(candidate);
                if allowed.len() == limit {
                    break;
                }
            }
        }
        allowed
    }

    /// Over-fetch and authorize until `limit` results are found.
    ///
    /// `fetch(window)` must return the top `window` candidates in rank order.
    /// The window starts at `limit * multiplier`, grows by `growth_factor`
    /// per retry, and never exceeds `max_candidates`. The loop ends early
    /// when the source returns fewer candidates than requested.
    pub fn search<C, E, F>(
        &self,
        policy: &Arc<Policy>,
        user: &UserContext,
        limit: usize,
        mut fetch: F,
    ) -> Result<PostFilterOutcome<C>, E>
    where
        C: Candidate,
        F: FnMut(usize) -> Result<Vec<C>, E>,
    {
        let mut outcome = PostFilterOutcome {
            results: Vec::new(),
            rounds: 0,
            examined: 0,
            exhausted: false,
        };
        if limit == 0 {
            return Ok(outcome);
        }

        let cap = self.config.max_candidates.max(limit);
        let mut window = limit.saturating_mul(self.config.multiplier).min(cap);

        for round in 0..=self.config.max_retries {
            let candidates = fetch(window)?;
            let returned = candidates.len();
            outcome.rounds = round + 1;
            outcome.examined = returned;
            outcome.exhausted = returned < window;
            outcome.results = self.filter_candidates(policy, user, candidates, limit);

            debug!(
                policy_id = %policy.id(),
                round = outcome.rounds,
                window,
                returned,
                authorized = outcome.results.len(),
                "Post-filter round"
            );

            if outcome.results.len() >= limit || outcome.exhausted || window >= cap {
                return Ok(outcome);
            }
            window = window.saturating_mul(self.config.growth_factor).min(cap);
        }

        warn!(
            policy_id = %policy.id(),
            limit,
            found = outcome.results.len(),
            rounds = outcome.rounds,
            "Post-filter retries exhausted with partial results"
        );
        Ok(outcome)
    }
}
