//! Server command implementation.

use kvclone_server::{CloneServer, ServerConfig};
use kvclone_transport::{Endpoint, TcpTransport};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Runs the server command until Ctrl-C.
pub async fn run(
    endpoint: Endpoint,
    heartbeat_interval: Duration,
    ttl_scan_interval: Duration,
    stats_every: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::new(endpoint)
        .with_heartbeat_interval(heartbeat_interval)
        .with_ttl_scan_interval(ttl_scan_interval);
    let server = CloneServer::new(config, Arc::new(TcpTransport::new()))?
        .start()
        .await?;
    let handle = server.handle();

    if stats_every.is_zero() {
        tokio::signal::ctrl_c().await?;
    } else {
        let mut ticker = tokio::time::interval(stats_every);
        ticker.tick().await;
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    break;
                }
                _ = ticker.tick() => {
                    let stats = handle.stats().await?;
                    info!(
                        sequence = stats.sequence,
                        keys = stats.keys,
                        snapshots = stats.snapshots_served,
                        collected = stats.updates_collected,
                        expired = stats.records_expired,
                        dropped = stats.malformed_dropped,
                        "server stats"
                    );
                }
            }
        }
    }

    info!("interrupted, shutting down");
    server.shutdown().await;
    Ok(())
}
