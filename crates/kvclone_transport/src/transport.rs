//! Fabric abstraction.

use crate::endpoint::Endpoint;
use crate::error::TransportResult;
use crate::socket::{ClientSockets, ServerSockets};
use async_trait::async_trait;

/// A transport binds servers and connects clients over some fabric.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (in-process channels, TCP, etc.). Implementations are
/// shared between tasks, so they must be cheap to call concurrently.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Binds the three server sockets at `endpoint`.
    ///
    /// Fails with `AddressInUse` if another server holds the endpoint.
    async fn bind(&self, endpoint: &Endpoint) -> TransportResult<ServerSockets>;

    /// Connects the three client sockets to the server at `endpoint`.
    ///
    /// The subscriber is live by the time this returns: anything the server
    /// publishes afterwards under one of `prefixes` will be delivered.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        prefixes: &[String],
    ) -> TransportResult<ClientSockets>;
}
