//! Policy compilation limits.
//!
//! # Example (TOML)
//!
//! ```toml
//! max_rules = 100
//! max_conditions_per_rule = 100
//! max_list_size = 1000
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bounds enforced when a policy document is compiled.
///
/// Evaluation never re-checks these; a compiled policy is known to be within
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyLimits {
    /// Maximum number of rules in one policy.
    pub max_rules: usize,

    /// Maximum number of conditions in one rule.
    pub max_conditions_per_rule: usize,

    /// Maximum number of elements in one list literal.
    pub max_list_size: usize,

    /// Maximum serialized size of one list literal, in UTF-8 bytes.
    pub max_list_bytes: usize,

    /// Maximum serialized size of the whole policy document, in bytes.
    pub max_policy_size_bytes: usize,

    /// Maximum parenthesis nesting inside one condition.
    pub max_nesting_depth: usize,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            max_rules: 100,
            max_conditions_per_rule: 100,
            max_list_size: 1000,
            max_list_bytes: 100_000,
            max_policy_size_bytes: 1_048_576,
            max_nesting_depth: 10,
        }
    }
}

impl PolicyLimits {
    /// Parse limits from a TOML table.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = PolicyLimits::default();
        assert_eq!(limits.max_rules, 100);
        assert!(limits.max_conditions_per_rule >= 10);
        assert!(limits.max_list_size >= 100);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let limits = PolicyLimits::from_toml_str("max_rules = 5").unwrap();
        assert_eq!(limits.max_rules, 5);
        assert_eq!(limits.max_list_size, 1000);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(PolicyLimits::from_toml_str("max_rules = 'many'").is_err());
    }
}
