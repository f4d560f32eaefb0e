//! Error types for cfenv.

use thiserror::Error;

/// Result type for cfenv operations.
pub type CfenvResult<T> = Result<T, CfenvError>;

/// Errors that can occur while fetching or applying env snapshots.
#[derive(Error, Debug)]
pub enum CfenvError {
    /// A required configuration field is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure after retries, or a failed remote API call.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the failure was transient.
        retryable: bool,
    },

    /// The remote data could not be verified.
    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// The request was cancelled at a retry boundary.
    #[error("request cancelled")]
    Cancelled,

    /// An encrypted snapshot could not be decrypted.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The hot updater has no worker to serve the request.
    #[error("hot updater is not running")]
    NotRunning,

    /// An on-demand refresh was requested from the updater's own thread.
    #[error("refresh_once cannot be called from an updater callback")]
    ReentrantRefresh,

    /// A refresh panicked; the message is the panic payload.
    #[error("refresh panicked: {0}")]
    Panic(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `.env` file could not be parsed.
    #[error("invalid env file at line {line}: {message}")]
    InvalidEnvFile {
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },
}

impl CfenvError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error came from a transient condition.
    pub fn is_retryable(&self) -> bool {
        match self {
            CfenvError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns true if this is an integrity failure.
    pub fn is_integrity(&self) -> bool {
        matches!(self, CfenvError::Integrity(_))
    }
}

/// Consistency failures detected while assembling a snapshot.
///
/// Any of these aborts the fetch; no partial snapshot is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// No metadata record exists for the target.
    #[error("metadata not found")]
    MetadataNotFound,

    /// The metadata record is not valid JSON.
    #[error("invalid metadata payload: {0}")]
    InvalidMetadata(String),

    /// The metadata record has no checksum.
    #[error("missing checksum")]
    MissingChecksum,

    /// No current pointer exists for a snapshot-mode target.
    #[error("current pointer not found")]
    PointerNotFound,

    /// The current pointer is not valid JSON or names no version.
    #[error("invalid current pointer: {0}")]
    InvalidPointer(String),

    /// The requested snapshot version does not exist.
    #[error("snapshot version \"{0}\" not found")]
    VersionNotFound(String),

    /// A snapshot version payload is not valid JSON.
    #[error("invalid snapshot payload: {0}")]
    InvalidSnapshot(String),

    /// The recomputed checksum differs from the stored one.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum stored in the metadata record.
        expected: String,
        /// Checksum computed over the retrieved entries.
        actual: String,
    },
}
