//! Error types for wire-data parsing in helmwatch-types.

use thiserror::Error;

/// Errors that can occur when normalizing alert or status data received
/// from either channel.
///
/// A `ParseError` never aborts ingestion: the offending record or snapshot
/// is dropped and the rest of the delivery is kept.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The value had the wrong JSON shape (e.g. an array where an object was expected).
    #[error("Unexpected shape for {what}: expected {expected}")]
    UnexpectedShape {
        /// What was being parsed.
        what: &'static str,
        /// The expected JSON shape.
        expected: &'static str,
    },

    /// A required field was missing.
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    /// A field was present but its value could not be interpreted.
    #[error("Invalid value for '{field}': {value}")]
    InvalidValue {
        /// The field name.
        field: &'static str,
        /// The offending value, rendered for logging.
        value: String,
    },

    /// A timestamp could not be parsed as RFC 3339 or Unix milliseconds.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl ParseError {
    /// Create an invalid value error.
    pub fn invalid(field: &'static str, value: impl ToString) -> Self {
        Self::InvalidValue {
            field,
            value: value.to_string(),
        }
    }
}

/// Result type alias using helmwatch-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
