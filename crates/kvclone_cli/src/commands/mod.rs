//! CLI command implementations.

pub mod dump;
pub mod get;
pub mod server;
pub mod set;

use kvclone_client::{ClientConfig, CloneClient, SyncState};
use kvclone_transport::{Endpoint, TcpTransport};
use std::sync::Arc;
use std::time::Duration;

/// How a client command reaches the server.
pub struct ConnectOptions {
    /// Endpoints to try in order.
    pub endpoints: Vec<Endpoint>,
    /// Key prefix to replicate.
    pub subtree: String,
    /// Expected server heartbeat interval.
    pub heartbeat_interval: Duration,
    /// How long to wait for the first snapshot.
    pub timeout: Duration,
}

/// Starts a client and waits for it to finish its first snapshot.
pub async fn connect(options: ConnectOptions) -> Result<CloneClient, Box<dyn std::error::Error>> {
    if let Some(endpoint) = options
        .endpoints
        .iter()
        .find(|e| !matches!(e, Endpoint::Tcp { .. }))
    {
        return Err(format!("{} is not a TCP endpoint", endpoint).into());
    }

    let config = ClientConfig::new(options.endpoints)
        .with_subtree(options.subtree)
        .with_heartbeat_interval(options.heartbeat_interval);
    let client = CloneClient::start(config, Arc::new(TcpTransport::new()))?;

    let synced = tokio::time::timeout(
        options.timeout,
        client.wait_for_state(SyncState::Subscribed),
    )
    .await;
    match synced {
        Ok(status) => {
            status?;
            Ok(client)
        }
        Err(_) => {
            client.shutdown().await;
            Err(format!("no server answered within {:?}", options.timeout).into())
        }
    }
}
