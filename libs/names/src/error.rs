//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name string is empty.
    #[error("{kind} name cannot be empty")]
    Empty { kind: &'static str },

    /// The name exceeds the maximum length.
    #[error("{kind} name is {len} characters, maximum is {max}")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },

    /// The name contains a character outside the allowed set.
    #[error("{kind} name '{name}' contains invalid character '{ch}'")]
    InvalidChar {
        kind: &'static str,
        name: String,
        ch: char,
    },

    /// The name is `.` or `..`, which would be read as a relative path.
    #[error("{kind} name '{name}' is a relative path segment")]
    DotSegment { kind: &'static str, name: String },

    /// A foldered service name has an empty path segment.
    #[error("service name '{0}' has an empty folder segment")]
    EmptySegment(String),
}

impl NameError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, NameError::Empty { .. })
    }
}
