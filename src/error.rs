//! Error types for ampify.
//!
//! Rule violations inside a sanitize pass never surface as errors; they are
//! resolved by dropping the attribute, dropping the element, or coercing the
//! value. Only rule-table loading and HTML serialization are fallible.
//!
//! All errors use the `thiserror` crate for minimal boilerplate and proper
//! error trait implementations.

use thiserror::Error;

/// Result type alias for ampify operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for ampify.
#[derive(Error, Debug)]
pub enum Error {
  /// Rule-table loading or compilation error
  #[error("Rule error: {0}")]
  Rule(#[from] RuleError),

  /// HTML serialization error
  #[error("Serialize error: {0}")]
  Serialize(#[from] std::io::Error),
}

/// Errors raised while loading a rule table.
///
/// A rule entry with a missing `name` is skipped with a warning rather than
/// reported here; a single misconfigured entry must not abort a pass.
#[derive(Error, Debug)]
pub enum RuleError {
  /// The rule table was not valid JSON of the expected shape
  #[error("Invalid rule JSON: {0}")]
  Json(#[from] serde_json::Error),

  /// A `value_regex`/`blacklisted_value_regex` pattern failed to compile
  #[error("Invalid pattern {pattern:?} for attribute {attr:?}: {source}")]
  InvalidPattern {
    attr: String,
    pattern: String,
    source: regex::Error,
  },
}
