//! Filter compilation error types.

use crate::backends::Backend;

/// Errors raised while translating a policy into a native filter.
///
/// Every variant means the caller must not run an unfiltered query: either
/// fall back to post-filtering or refuse the search.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterCompilationError {
    /// A rule cannot be expressed natively; evaluate it after retrieval.
    #[error("Rule '{rule}' cannot be expressed as a {backend} filter: {reason}")]
    RequiresPostFilter {
        /// Target backend.
        backend: Backend,
        /// Name of the untranslatable rule.
        rule: String,
        /// What the backend cannot express.
        reason: String,
    },

    /// A field name is not safe to embed in the target query language.
    #[error("Invalid identifier '{0}' for native filter")]
    InvalidIdentifier(String),

    /// The translated filter exceeds the configured size bound.
    #[error("Filter for {backend} too complex: {reason}")]
    TooComplex {
        /// Target backend.
        backend: Backend,
        /// Which bound was exceeded.
        reason: String,
    },
}

impl FilterCompilationError {
    /// `true` when the caller can recover by post-filtering.
    #[must_use]
    pub fn requires_post_filter(&self) -> bool {
        matches!(self, Self::RequiresPostFilter { .. } | Self::TooComplex { .. })
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The TOML input could not be parsed.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its accepted range.
    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue {
        /// Offending key.
        field: &'static str,
        /// Why it is rejected.
        message: String,
    },
}

/// Result type for filter compilation.
pub type FilterResult<T> = Result<T, FilterCompilationError>;
