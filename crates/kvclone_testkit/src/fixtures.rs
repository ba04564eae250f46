//! Test fixtures for kvclone testing.
//!
//! Provides a ready-made in-process cluster: one server, any number of
//! clients, and controls for severing links and restarting the server.

use kvclone_client::{ClientConfig, CloneClient, RetryConfig};
use kvclone_server::{CloneServer, RunningServer, ServerConfig, ServerHandle};
use kvclone_transport::{Endpoint, InprocTransport};
use std::sync::Arc;
use std::time::Duration;

/// Heartbeat interval used by fixtures.
pub const FAST_HEARTBEAT: Duration = Duration::from_millis(50);

/// TTL scan interval used by fixtures.
pub const FAST_TTL_SCAN: Duration = Duration::from_millis(20);

/// Reconnect delay used by fixtures.
pub const FAST_RETRY: Duration = Duration::from_millis(20);

/// A server configuration with short timers.
pub fn fast_server_config(endpoint: Endpoint) -> ServerConfig {
    ServerConfig::new(endpoint)
        .with_heartbeat_interval(FAST_HEARTBEAT)
        .with_ttl_scan_interval(FAST_TTL_SCAN)
}

/// A client configuration with short timers.
///
/// The liveness factor is generous so that a busy test runner does not
/// trip the silence timeout.
pub fn fast_client_config(endpoints: impl IntoIterator<Item = Endpoint>) -> ClientConfig {
    ClientConfig::new(endpoints)
        .with_heartbeat_interval(FAST_HEARTBEAT)
        .with_liveness_factor(6)
        .with_retry(RetryConfig::fixed(FAST_RETRY))
}

/// Starts a server with [`fast_server_config`] on `endpoint`.
///
/// # Panics
///
/// Panics if the endpoint is already bound.
pub async fn start_server(transport: &Arc<InprocTransport>, endpoint: Endpoint) -> RunningServer {
    CloneServer::new(fast_server_config(endpoint), Arc::clone(transport))
        .expect("Failed to create server")
        .start()
        .await
        .expect("Failed to start server")
}

/// One in-process server with its clients.
pub struct Cluster {
    transport: Arc<InprocTransport>,
    endpoint: Endpoint,
    server: Option<RunningServer>,
    clients: Vec<CloneClient>,
}

impl Cluster {
    /// Starts a server on the inproc endpoint `name`.
    pub async fn start(name: &str) -> Self {
        let transport = Arc::new(InprocTransport::new());
        let endpoint = Endpoint::inproc(name);
        let server = start_server(&transport, endpoint.clone()).await;
        Self {
            transport,
            endpoint,
            server: Some(server),
            clients: Vec::new(),
        }
    }

    /// Returns the server endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the shared transport.
    pub fn transport(&self) -> Arc<InprocTransport> {
        Arc::clone(&self.transport)
    }

    /// Returns a handle to the running server.
    ///
    /// # Panics
    ///
    /// Panics if the server is stopped.
    pub fn handle(&self) -> ServerHandle {
        self.server
            .as_ref()
            .map(RunningServer::handle)
            .expect("Server is not running")
    }

    /// Returns the running server's instance id.
    pub fn server_id(&self) -> Option<String> {
        self.server.as_ref().map(|s| s.server_id().to_string())
    }

    /// Starts a client replicating `subtree`.
    pub fn client(&mut self, subtree: &str) -> CloneClient {
        let config = fast_client_config([self.endpoint.clone()]).with_subtree(subtree);
        self.client_with(config)
    }

    /// Starts a client with a custom configuration.
    pub fn client_with(&mut self, config: ClientConfig) -> CloneClient {
        let client = CloneClient::start(config, self.transport()).expect("Failed to start client");
        self.clients.push(client.clone());
        client
    }

    /// Cuts every client link without stopping the server.
    pub fn sever(&self) -> usize {
        self.transport.sever(&self.endpoint)
    }

    /// Stops the server, leaving the endpoint unbound.
    pub async fn stop_server(&mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }
    }

    /// Replaces the server with a fresh instance on the same endpoint.
    ///
    /// The new instance starts with an empty store and a new id.
    pub async fn restart_server(&mut self) {
        self.stop_server().await;
        self.server = Some(start_server(&self.transport, self.endpoint.clone()).await);
    }

    /// Stops every client and then the server.
    pub async fn shutdown(mut self) {
        for client in self.clients.drain(..) {
            client.shutdown().await;
        }
        self.stop_server().await;
    }
}
