//! Compiled filter caching.
//!
//! Compiling a filter is cheap but not free, and vector search traffic is
//! dominated by a small set of users. The cache memoizes compiled filters.
//!
//! ## Design
//!
//! - **Cache Key**: SHA-256 over the policy fingerprint, the compiler
//!   settings, the backend and the user attributes that can influence the
//!   filter
//! - **Cache Value**: the [`NativeFilter`]; errors are never cached
//! - **Concurrent Access**: DashMap, no global lock
//! - **Eviction**: least recently used entry when at capacity, plus a
//!   maximum entry age
//!
//! Keying on the policy fingerprint means an entry compiled from an old
//! policy can never be served for a new one, even if it is inserted after
//! [`FilterCache::invalidate`] ran.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ragguard_policy::{Policy, Resolved, UserContext};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::backends::{Backend, NativeFilter};
use crate::compiler::FilterCompiler;
use crate::config::{CacheConfig, CacheKeyStrategy};
use crate::error::FilterResult;

/// Maximum age before an entry is recompiled (default: 1 hour)
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

struct CacheEntry {
    filter: NativeFilter,
    cached_at: Instant,
    last_access: AtomicU64,
}

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub insertions: AtomicU64,
    pub invalidations: AtomicU64,
    pub size: AtomicUsize,
}

impl CacheStatistics {
    /// Calculate hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;

        if total == 0.0 { 0.0 } else { hits / total }
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, capacity: usize) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
            capacity,
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub insertions: u64,
    pub invalidations: u64,
    pub size: usize,
    pub capacity: usize,
    pub hit_ratio: f64,
}

/// Thread-safe filter cache with LRU eviction.
pub struct FilterCache {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
    max_age: Duration,
    enabled: bool,
    key_strategy: CacheKeyStrategy,
    /// Logical clock for recency.
    clock: AtomicU64,
    stats: Arc<CacheStatistics>,
}

impl fmt::Debug for FilterCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCache")
            .field("capacity", &self.capacity)
            .field("size", &self.entries.len())
            .field("max_age", &self.max_age)
            .field("enabled", &self.enabled)
            .field("key_strategy", &self.key_strategy)
            .field("stats", &self.stats())
            .finish()
    }
}

impl FilterCache {
    /// Create a cache holding at most `capacity` filters.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity,
            max_age: DEFAULT_MAX_AGE,
            enabled: true,
            key_strategy: CacheKeyStrategy::default(),
            clock: AtomicU64::new(0),
            stats: Arc::new(CacheStatistics::default()),
        }
    }

    /// Create a disabled cache (no-op).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(0)
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self::new(config.capacity)
            .with_max_age(config.max_age)
            .with_key_strategy(config.key_strategy)
    }

    /// Set the maximum age for cache entries.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_key_strategy(mut self, strategy: CacheKeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return the cached filter or compile, cache and return it.
    pub fn get_or_compile(
        &self,
        policy: &Policy,
        user: &UserContext,
        backend: Backend,
        compiler: &FilterCompiler,
    ) -> FilterResult<NativeFilter> {
        if !self.enabled {
            return compiler.compile(policy, user, backend);
        }

        let key = self.cache_key(policy, user, backend, compiler);
        if let Some(filter) = self.get(&key) {
            trace!(policy_id = %policy.id(), %backend, "Filter cache hit");
            return Ok(filter);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let filter = compiler.compile(policy, user, backend)?;
        self.insert(key, filter.clone());
        debug!(policy_id = %policy.id(), %backend, "Filter cache miss, compiled");
        Ok(filter)
    }

    /// Drop every entry.
    pub fn invalidate(&self) {
        self.entries.clear();
        self.stats.size.store(0, Ordering::Relaxed);
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!("Filter cache invalidated");
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot(self.capacity)
    }

    /// Get current cache size.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Derive the key for a policy, user, backend and compiler.
    pub fn cache_key(
        &self,
        policy: &Policy,
        user: &UserContext,
        backend: Backend,
        compiler: &FilterCompiler,
    ) -> String {
        let user_part = match self.key_strategy {
            CacheKeyStrategy::FullUser => Value::Object(user.clone()),
            CacheKeyStrategy::ReferencedFields => {
                // Absent keys stay absent so `null` and missing remain distinct.
                let mut relevant = Map::new();
                for field in policy.referenced_user_fields() {
                    if let Some(value) = Resolved::lookup(user, field.segments()).to_value() {
                        relevant.insert(field.key().to_string(), value);
                    }
                }
                Value::Object(relevant)
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(policy.fingerprint().as_bytes());
        hasher.update([0]);
        hasher.update(compiler.fingerprint().as_bytes());
        hasher.update([0]);
        hasher.update(backend.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(user_part.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn get(&self, key: &str) -> Option<NativeFilter> {
        if let Some(entry) = self.entries.get(key) {
            if entry.cached_at.elapsed() > self.max_age {
                drop(entry);
                self.entries.remove(key);
                self.stats.size.store(self.entries.len(), Ordering::Relaxed);
                return None;
            }
            entry.last_access.store(self.tick(), Ordering::Relaxed);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.filter.clone());
        }
        None
    }

    fn insert(&self, key: String, filter: NativeFilter) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_lru();
        }
        let entry = CacheEntry {
            filter,
            cached_at: Instant::now(),
            last_access: AtomicU64::new(self.tick()),
        };
        self.entries.insert(key, entry);
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);
        self.stats.size.store(self.entries.len(), Ordering::Relaxed);
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_access.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        if oldest.is_some_and(|key| self.entries.remove(&key).is_some()) {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}
