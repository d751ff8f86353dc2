//! Error types for the sync engine.

use chatsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// `Clone` so that one cycle outcome can be handed to every caller that
/// coalesced into it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A request was malformed. Nothing was applied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Credentials were missing, invalid or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The resource is unknown or not accessible.
    #[error("resource not found")]
    NotFound,

    /// The fetch failed in a way that may succeed later.
    #[error("transient fetch failure: {0}")]
    TransientFetchFailure(String),

    /// The server answered with something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A bug or a broken invariant, including a panicking cycle.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Returns true if retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientFetchFailure(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidArgument(msg) => SyncError::InvalidArgument(msg),
            ProtocolError::Decode(msg) => SyncError::Protocol(msg),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}
