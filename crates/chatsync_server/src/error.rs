//! Error types for the sync server.

use chatsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed query parameters or request fields.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing, malformed or expired credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The resource does not exist or the caller may not see it.
    ///
    /// Deliberately carries no detail.
    #[error("resource not found")]
    NotFound,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidArgument(_) => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::NotFound => 404,
            ServerError::Internal(_) | ServerError::Io(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidArgument(msg) => ServerError::InvalidArgument(msg),
            ProtocolError::Decode(msg) => ServerError::InvalidArgument(msg),
        }
    }
}
