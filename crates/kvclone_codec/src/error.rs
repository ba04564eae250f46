//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The frame set violates the wire layout.
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// Description of the framing violation.
        reason: String,
    },

    /// The key is longer than the configured maximum.
    #[error("key too long: {len} bytes (max {max})")]
    KeyTooLong {
        /// Length of the rejected key in bytes.
        len: usize,
        /// Configured maximum key length.
        max: usize,
    },
}

impl CodecError {
    /// Create a malformed message error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Returns true if the error came from decoding untrusted input.
    ///
    /// Malformed input is dropped by the receiver; it is never fatal.
    pub fn is_malformed(&self) -> bool {
        matches!(self, CodecError::MalformedMessage { .. })
    }
}
