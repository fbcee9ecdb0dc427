//! Error types for value parsing in waymark-types.

use thiserror::Error;

/// Errors that can occur when parsing or validating waymark values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A field value is outside its valid range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A string did not name a known variant.
    #[error("Unknown {kind}: '{value}'")]
    UnknownVariant {
        /// The kind of value being parsed (e.g. "delivery state").
        kind: &'static str,
        /// The rejected input.
        value: String,
    },
}

/// Result type alias using waymark-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
