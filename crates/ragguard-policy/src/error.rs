//! Policy validation and evaluation error types.
//!
//! Validation errors are raised once, when a policy document is compiled.
//! Evaluation itself is total: missing fields resolve to a sentinel and the
//! few exceptional inputs surface as [`EvaluationError`] from
//! [`PolicyEngine::try_evaluate`](crate::PolicyEngine::try_evaluate).

/// Errors raised while compiling a policy document or one of its conditions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyValidationError {
    /// Generic syntax error inside a condition expression.
    #[error("Invalid condition '{condition}': {message}")]
    Syntax {
        /// The condition source text.
        condition: String,
        /// What went wrong.
        message: String,
    },

    /// An operator-like token that is not a supported operator.
    #[error("{}", invalid_operator_message(.token, .suggestion, .condition))]
    InvalidOperator {
        /// The offending token, e.g. `===`.
        token: String,
        /// The operator the author most likely meant.
        suggestion: Option<String>,
        /// The condition source text.
        condition: String,
    },

    /// The condition contains no comparison operator at all.
    #[error(
        "Invalid condition '{condition}': no valid operator found. Supported operators: \
         ==, !=, <, >, <=, >=, in, not in, exists, not exists \
         (example: user.department == document.department)"
    )]
    NoOperator {
        /// The condition source text.
        condition: String,
    },

    /// A string literal that never terminates.
    #[error("Invalid condition '{condition}': unclosed quote in string literal")]
    UnclosedQuote {
        /// The condition source text.
        condition: String,
    },

    /// A list literal without its closing `]`.
    #[error("Invalid condition '{condition}': missing closing bracket in list literal")]
    MissingClosingBracket {
        /// The condition source text.
        condition: String,
    },

    /// A list literal inside another list literal.
    #[error("Invalid condition '{condition}': nested list literals are not supported")]
    NestedList {
        /// The condition source text.
        condition: String,
    },

    /// A list literal exceeding the element or byte bound.
    #[error("List literal too large in '{condition}': {detail}")]
    ListTooLarge {
        /// The condition source text.
        condition: String,
        /// Which bound was exceeded.
        detail: String,
    },

    /// Parentheses or connectives nested beyond the configured depth.
    #[error("Condition nested too deeply in '{condition}': maximum depth is {max}")]
    NestingTooDeep {
        /// The condition source text.
        condition: String,
        /// Configured maximum depth.
        max: usize,
    },

    /// The policy declares more rules than allowed.
    #[error("Too many rules: policy has {count} rules, maximum is {max}")]
    TooManyRules {
        /// Number of rules in the document.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A rule declares more conditions than allowed.
    #[error("Too many conditions in rule '{rule}': {count} conditions, maximum is {max}")]
    TooManyConditions {
        /// Rule name.
        rule: String,
        /// Number of conditions in the rule.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The serialized policy exceeds the size bound.
    #[error("Policy too large: {size} bytes, maximum is {max} bytes")]
    PolicyTooLarge {
        /// Serialized size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Two rules share a name.
    #[error("Duplicate rule name '{name}'")]
    DuplicateRuleName {
        /// The repeated name.
        name: String,
    },

    /// A rule without a name.
    #[error("Rule at position {index} has an empty name")]
    EmptyRuleName {
        /// Zero-based rule position.
        index: usize,
    },

    /// A malformed field path.
    #[error("Invalid field path '{path}': {message}")]
    InvalidPath {
        /// The path as written.
        path: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `match` entry that cannot be compared.
    #[error("Invalid match entry '{field}' in rule '{rule}': {message}")]
    InvalidMatch {
        /// Rule name.
        rule: String,
        /// Match key.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The policy document itself could not be decoded.
    #[error("Invalid policy document: {0}")]
    InvalidDocument(String),
}

fn invalid_operator_message(token: &str, suggestion: &Option<String>, condition: &str) -> String {
    match suggestion {
        Some(suggested) => format!(
            "Invalid operator '{token}' in condition '{condition}'. Did you mean '{suggested}'?"
        ),
        None => format!("Invalid operator '{token}' in condition '{condition}'"),
    }
}

impl PolicyValidationError {
    /// Create a syntax error for the given condition.
    pub fn syntax(condition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            condition: condition.into(),
            message: message.into(),
        }
    }

    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Exceptional inputs encountered while evaluating a compiled policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// A structural comparison descended past the supported nesting depth.
    #[error("Value nesting exceeds maximum depth of {max} while evaluating '{condition}'")]
    ValueTooDeep {
        /// The condition being evaluated.
        condition: String,
        /// Maximum supported depth.
        max: usize,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The TOML input could not be parsed.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for policy compilation.
pub type PolicyResult<T> = Result<T, PolicyValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_operator_message_includes_suggestion() {
        let err = PolicyValidationError::InvalidOperator {
            token: "===".to_string(),
            suggestion: Some("==".to_string()),
            condition: "user.id === document.owner".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'==='"));
        assert!(msg.contains("Did you mean '=='"));
    }

    #[test]
    fn test_limit_messages_name_the_limit() {
        let err = PolicyValidationError::TooManyRules { count: 101, max: 100 };
        assert!(err.to_string().starts_with("Too many rules"));

        let err = PolicyValidationError::PolicyTooLarge {
            size: 2_000_000,
            max: 1_048_576,
        };
        assert!(err.to_string().starts_with("Policy too large"));
    }

    #[test]
    fn test_no_operator_lists_supported_operators() {
        let err = PolicyValidationError::NoOperator {
            condition: "user.department".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("no valid operator"));
        assert!(msg.contains("not in"));
        assert!(msg.contains("example"));
    }
}
