//! Set and delete command implementation.

use super::{connect, ConnectOptions};
use kvclone_client::CloneClient;
use std::time::Duration;

/// Runs the set command, or the delete command when `value` is `None`.
///
/// Returns once the server has published the write back to this client.
pub async fn run(
    options: ConnectOptions,
    key: &str,
    value: Option<String>,
    ttl: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = options.timeout;
    let client = connect(options).await?;
    let result = write(&client, key, value, ttl, timeout).await;
    client.shutdown().await;
    let sequence = result?;
    println!("{} @ {}", key, sequence);
    Ok(())
}

async fn write(
    client: &CloneClient,
    key: &str,
    value: Option<String>,
    ttl: Option<Duration>,
    timeout: Duration,
) -> Result<u64, Box<dyn std::error::Error>> {
    let before = client.status().cursor;
    // An empty value is stored as a deletion.
    let deleting = value.as_deref().map_or(true, str::is_empty);
    client
        .set(key, value.unwrap_or_default().into_bytes(), ttl)
        .await?;

    // Published writes arrive with a sequence past the cursor seen before.
    let published = client.wait_for(|status| status.cursor > before);
    let status = tokio::time::timeout(timeout, published)
        .await
        .map_err(|_| format!("write to {} not confirmed within {:?}", key, timeout))??;

    let record = client.get_record(key).await?;
    match record {
        Some(record) if !deleting => Ok(record.sequence),
        None if deleting => Ok(status.cursor),
        _ => Err(format!("{} was overwritten concurrently", key).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvclone_client::{ClientConfig, SyncState};
    use kvclone_server::{CloneServer, ServerConfig};
    use kvclone_transport::{Endpoint, InprocTransport};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn empty_value_confirms_as_delete() {
        let transport = Arc::new(InprocTransport::new());
        let endpoint = Endpoint::inproc("cli-set");
        let server = CloneServer::new(
            ServerConfig::new(endpoint.clone()).with_heartbeat_interval(Duration::from_millis(50)),
            transport.clone(),
        )
        .unwrap()
        .start()
        .await
        .unwrap();
        let config = ClientConfig::new([endpoint]).with_heartbeat_interval(Duration::from_millis(50));
        let client = CloneClient::start(config, transport).unwrap();
        tokio::time::timeout(TIMEOUT, client.wait_for_state(SyncState::Subscribed))
            .await
            .unwrap()
            .unwrap();

        let set = write(&client, "k", Some("v".to_string()), None, TIMEOUT).await.unwrap();
        assert_eq!(set, 1);
        let emptied = write(&client, "k", Some(String::new()), None, TIMEOUT).await.unwrap();
        assert_eq!(emptied, 2);
        assert_eq!(client.get("k").await.unwrap(), None);
        let deleted = write(&client, "k", None, None, TIMEOUT).await.unwrap();
        assert_eq!(deleted, 3);

        client.shutdown().await;
        server.shutdown().await;
    }
}
