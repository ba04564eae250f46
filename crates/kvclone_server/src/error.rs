//! Error types for the state server.

use kvclone_codec::CodecError;
use kvclone_transport::TransportError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the state server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A peer sent a request the server will not act on.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Frame encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Socket or fabric failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server loop is no longer running.
    #[error("server is not running")]
    Closed,
}

impl ServerError {
    /// Returns true if this error is a setup-time configuration problem.
    pub fn is_config_error(&self) -> bool {
        match self {
            ServerError::Config(_) => true,
            ServerError::Transport(e) => e.is_config_error(),
            _ => false,
        }
    }

    /// Returns true if this error was caused by a peer's message.
    pub fn is_peer_error(&self) -> bool {
        matches!(self, ServerError::InvalidRequest(_) | ServerError::Codec(_))
    }
}
