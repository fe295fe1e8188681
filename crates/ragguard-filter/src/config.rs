//! Runtime configuration for filter compilation, caching and post-filtering.
//!
//! # Example (TOML)
//!
//! ```toml
//! [limits]
//! max_rules = 100
//!
//! [cache]
//! enabled = true
//! capacity = 10000
//! max_age = "1h"
//! key_strategy = "referenced_fields"
//!
//! [compiler]
//! unsupported = "post_filter"
//! sql_column = "metadata"
//!
//! [post_filter]
//! multiplier = 4
//! max_retries = 3
//! ```

use std::time::Duration;

use ragguard_policy::PolicyLimits;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Policy compilation bounds.
    pub limits: PolicyLimits,

    /// Filter cache settings.
    pub cache: CacheConfig,

    /// Filter compiler settings.
    pub compiler: CompilerConfig,

    /// Post-filter fallback settings.
    pub post_filter: PostFilterConfig,
}

impl GuardConfig {
    /// Parse and validate configuration from TOML.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.capacity",
                message: "must be greater than zero when the cache is enabled".to_string(),
            });
        }
        if self.post_filter.multiplier == 0 {
            return Err(ConfigError::InvalidValue {
                field: "post_filter.multiplier",
                message: "must be at least 1".to_string(),
            });
        }
        if self.post_filter.growth_factor == 0 {
            return Err(ConfigError::InvalidValue {
                field: "post_filter.growth_factor",
                message: "must be at least 1".to_string(),
            });
        }
        if self.compiler.max_filter_terms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "compiler.max_filter_terms",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Which user attributes identify a cached filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyStrategy {
    /// `id`, `roles` and every user field the policy references.
    #[default]
    ReferencedFields,
    /// The entire user context.
    FullUser,
}

/// Filter cache configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable filter caching.
    pub enabled: bool,

    /// Maximum number of cached filters.
    pub capacity: usize,

    /// Entries older than this are recompiled.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,

    /// Cache key derivation.
    pub key_strategy: CacheKeyStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            max_age: Duration::from_secs(3600),
            key_strategy: CacheKeyStrategy::ReferencedFields,
        }
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// What to do with a rule the target backend cannot express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedStrategy {
    /// Fail compilation so the caller post-filters.
    #[default]
    PostFilter,
    /// Drop the rule from the native filter (it can no longer grant access).
    DenyRule,
}

impl UnsupportedStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostFilter => "post_filter",
            Self::DenyRule => "deny_rule",
        }
    }
}

/// Filter compiler configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Handling of untranslatable rules.
    pub unsupported: UnsupportedStrategy,

    /// JSONB column holding document metadata for pgvector.
    pub sql_column: String,

    /// Number of bind parameters already used by the surrounding SQL query.
    pub sql_param_offset: usize,

    /// Maximum number of leaf predicates in one native filter.
    pub max_filter_terms: usize,
}

impl CompilerConfig {
    /// SHA-256 over every setting that changes compiled output.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.unsupported.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.sql_column.as_bytes());
        hasher.update([0]);
        hasher.update(self.sql_param_offset.to_le_bytes());
        hasher.update(self.max_filter_terms.to_le_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            unsupported: UnsupportedStrategy::PostFilter,
            sql_column: "metadata".to_string(),
            sql_param_offset: 0,
            max_filter_terms: 1000,
        }
    }
}

// =============================================================================
// Post-filter
// =============================================================================

/// Post-filter fallback configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PostFilterConfig {
    /// Initial over-fetch factor: fetch `limit * multiplier` candidates.
    pub multiplier: usize,

    /// Window growth factor per retry.
    pub growth_factor: usize,

    /// Additional fetch rounds after the first.
    pub max_retries: usize,

    /// Upper bound on candidates requested in a single round.
    pub max_candidates: usize,
}

impl Default for PostFilterConfig {
    fn default() -> Self {
        Self {
            multiplier: 4,
            growth_factor: 2,
            max_retries: 3,
            max_candidates: 10_000,
        }
    }
}
