use std::panic::Location;

use error_location::ErrorLocation;
use thiserror::Error;

/// Synchronization engine errors with source location tracking.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local SQLite operation failed.
    #[error("Storage error: {source} {location}")]
    Storage {
        /// Underlying error from rusqlite.
        #[source]
        source: rusqlite::Error,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Persisted value could not be encoded or decoded.
    #[error("Serialization error: {source} {location}")]
    Serialization {
        /// Underlying error from serde_json.
        #[source]
        source: serde_json::Error,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// A recording state write would move the recording backwards.
    #[error("Invalid transition for {recording}: {from} -> {to} {location}")]
    InvalidTransition {
        /// Recording the write targeted.
        recording: String,
        /// State currently persisted.
        from: String,
        /// State the caller tried to persist.
        to: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The caller identity could not be verified.
    #[error("Identity verification failed: {source} {location}")]
    IdentityUnavailable {
        /// Underlying error from the directory service.
        #[source]
        source: RemoteError,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The caller is not a member of the band it tried to record for.
    #[error("Not a member of band {band_id} {location}")]
    NotBandMember {
        /// Band the caller asked for.
        band_id: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// IO error from filesystem operations.
    #[error("IO error: {source} {location}")]
    Io {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {reason} {location}")]
    TaskFailed {
        /// Description of the failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Failed to send message through async channel.
    #[error("Channel send failed: {message} {location}")]
    ChannelSendFailed {
        /// Human-readable error message.
        message: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },
}

// Manual From impls with location tracking.
// Cannot use #[from] because it does not support extra fields.
impl From<rusqlite::Error> for SyncError {
    #[track_caller]
    fn from(source: rusqlite::Error) -> Self {
        SyncError::Storage {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    #[track_caller]
    fn from(source: serde_json::Error) -> Self {
        SyncError::Serialization {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        SyncError::Io {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    #[track_caller]
    fn from(source: tokio::task::JoinError) -> Self {
        SyncError::TaskFailed {
            reason: source.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

/// Errors returned by the remote sync service and identity directory.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("Transport error: {reason} {location}")]
    Transport {
        /// Description of the transport failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The service answered with a non-success status.
    #[error("HTTP status {status} from {url} {location}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The service answered 2xx with a body we could not understand.
    #[error("Malformed response: {reason} {location}")]
    MalformedResponse {
        /// Description of the decoding failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },
}

impl RemoteError {
    /// Whether a retry could plausibly succeed.
    ///
    /// 4xx responses are definitive rejections; the upload state machine
    /// still backs off on them like any other failure.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Transport { .. } => true,
            RemoteError::Status { status, .. } => *status >= 500 || *status == 429,
            RemoteError::MalformedResponse { .. } => false,
        }
    }
}

/// Result type alias using [`SyncError`].
pub type Result<T> = std::result::Result<T, SyncError>;
