//! Error types for the clone client.

use kvclone_codec::CodecError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned to callers of the clone client.
///
/// Connection loss is not among them: the client reconnects on its own and
/// reports progress through its status.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Key longer than the configured limit.
    #[error("key too long: {len} bytes (max {max})")]
    KeyTooLong {
        /// Key length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Empty keys are reserved.
    #[error("key must not be empty")]
    EmptyKey,

    /// The key is reserved for protocol use.
    #[error("reserved key: {0}")]
    ReservedKey(String),

    /// Too many writes are queued while the client is not subscribed.
    #[error("pending write queue full ({max} writes)")]
    PendingQueueFull {
        /// Queue limit.
        max: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The client has shut down.
    #[error("client is closed")]
    Closed,
}

impl ClientError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::PendingQueueFull { .. })
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::KeyTooLong { len, max } => ClientError::KeyTooLong { len, max },
            other => ClientError::Config(other.to_string()),
        }
    }
}
