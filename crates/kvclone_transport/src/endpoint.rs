//! Endpoint addresses.

use crate::error::{TransportError, TransportResult};
use std::fmt;
use std::str::FromStr;

/// A server address on one of the supported fabrics.
///
/// - `inproc://name` addresses a server in the same process
/// - `tcp://host:port` addresses a TCP server; it occupies `port` (snapshots),
///   `port + 1` (publish), and `port + 2` (collector). `*` as the host binds
///   every interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// In-process endpoint.
    Inproc(String),
    /// TCP endpoint, identified by its base port.
    Tcp {
        /// Host name or address.
        host: String,
        /// Base port.
        port: u16,
    },
}

impl Endpoint {
    /// Creates an in-process endpoint.
    pub fn inproc(name: impl Into<String>) -> Self {
        Endpoint::Inproc(name.into())
    }

    /// Creates a TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parses an endpoint string.
    pub fn parse(s: &str) -> TransportResult<Self> {
        s.parse()
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransportError::InvalidEndpoint(s.to_string());

        if let Some(name) = s.strip_prefix("inproc://") {
            if name.is_empty() {
                return Err(invalid());
            }
            return Ok(Endpoint::inproc(name));
        }

        if let Some(addr) = s.strip_prefix("tcp://") {
            let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
            if host.is_empty() {
                return Err(invalid());
            }
            let port: u16 = port.parse().map_err(|_| invalid())?;
            // Three consecutive ports are needed.
            if port == 0 || port > u16::MAX - 2 {
                return Err(invalid());
            }
            return Ok(Endpoint::tcp(host, port));
        }

        Err(invalid())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Inproc(name) => write!(f, "inproc://{}", name),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}
