//! Codec error types.

use thiserror::Error;

/// Error raised while encoding or decoding a command.
#[derive(Error, Debug)]
pub enum CodecError {
    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not valid UTF-8
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Kind tag not in the closed command set
    #[error("Unknown command kind: {0}")]
    UnknownKind(String),

    /// Protocol version this build does not speak
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// Required field absent
    #[error("Missing field '{field}'")]
    MissingField { field: String },

    /// Field present but unusable
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// Anything else structurally wrong with the frame
    #[error("Malformed command: {0}")]
    Malformed(String),
}

/// Result type alias using CodecError.
pub type CodecResult<T> = Result<T, CodecError>;
