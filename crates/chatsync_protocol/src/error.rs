//! Error types for protocol validation and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating or decoding protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A query parameter or field is malformed or out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A wire payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProtocolError {
    /// Creates an invalid argument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
