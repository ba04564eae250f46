//! Error types for the transport layer.

use crate::socket::PeerId;
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur on a socket or fabric.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The endpoint string could not be parsed or is unsupported.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Another server is already bound to the endpoint.
    #[error("endpoint already bound: {0}")]
    AddressInUse(String),

    /// No server is listening at the endpoint.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The addressed peer is no longer connected.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// The socket or its link has been closed.
    #[error("socket closed")]
    Closed,

    /// An inbound frame set exceeded the size limits.
    #[error("frame set too large: {size} (max {max})")]
    FrameTooLarge {
        /// Claimed size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A connect attempt timed out.
    #[error("operation timed out")]
    Timeout,

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns true if this error comes from bad configuration rather than
    /// from the network.
    pub fn is_config_error(&self) -> bool {
        matches!(self, TransportError::InvalidEndpoint(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_classification() {
        assert!(TransportError::InvalidEndpoint("x".into()).is_config_error());
        assert!(!TransportError::Closed.is_config_error());
        assert!(!TransportError::ConnectionRefused("inproc://a".into()).is_config_error());
    }

    #[test]
    fn error_display() {
        assert_eq!(TransportError::Closed.to_string(), "socket closed");
        assert_eq!(
            TransportError::UnknownPeer(PeerId::new(7)).to_string(),
            "unknown peer: peer-7"
        );
    }
}
