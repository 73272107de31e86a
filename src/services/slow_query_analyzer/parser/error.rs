//! Parser error types for profile documents

use thiserror::Error;

/// Errors that can occur while decoding profiler output
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Profile document is not a JSON object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid field {0}: {1}")]
    InvalidField(String, String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for parser operations
pub type ParseResult<T> = Result<T, ParseError>;
