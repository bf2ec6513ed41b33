//! Error types for the sync layer.

use thiserror::Error;
use vatomsync_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in region, pool and coordinator operations.
///
/// Cloneable so a single failure can be handed to every caller waiting on the
/// same in-flight synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network error (connection reset, DNS, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The remote has no such record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote refused the operation for this user.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other server-side failure.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The remote does not implement this call.
    #[error("unsupported by remote: {0}")]
    Unsupported(String),

    /// The remote no longer recognises the change token.
    #[error("change token rejected: {0}")]
    TokenRejected(String),

    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The region was closed.
    #[error("region closed")]
    RegionClosed,

    /// The object is unknown or its fields were never fetched.
    #[error("object not loaded: {0}")]
    ObjectNotLoaded(String),

    /// A key path could not be written.
    #[error("invalid key path: {0}")]
    InvalidPath(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// A background task died unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Errors that a later attempt may not hit again.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout => true,
            SyncError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Errors meaning the record is gone as far as this user is concerned.
    pub fn is_gone(&self) -> bool {
        matches!(self, SyncError::NotFound(_) | SyncError::PermissionDenied(_))
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

impl From<vatomsync_types::Error> for SyncError {
    fn from(e: vatomsync_types::Error) -> Self {
        match e {
            vatomsync_types::Error::InvalidPath(path) => SyncError::InvalidPath(path),
            other => SyncError::Decode(other.to_string()),
        }
    }
}
