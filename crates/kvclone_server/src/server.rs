//! Server event loop and control handle.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{ServerStats, StateHandler};
use bytes::Bytes;
use kvclone_codec::UpdateRecord;
use kvclone_transport::{Endpoint, PeerId, ServerSockets, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Commands accepted by the server loop from `ServerHandle`.
enum ControlCommand {
    Publish {
        record: UpdateRecord,
        reply: oneshot::Sender<ServerResult<u64>>,
    },
    Snapshot {
        subtree: String,
        reply: oneshot::Sender<Vec<UpdateRecord>>,
    },
    Stats {
        reply: oneshot::Sender<ServerStats>,
    },
    Shutdown,
}

/// The state server.
///
/// Binds the three server sockets through a [`Transport`] and runs every
/// duty on one event loop: snapshots, collected updates, TTL expiry,
/// heartbeats, and local control.
///
/// # Example
///
/// ```
/// use kvclone_server::{CloneServer, ServerConfig};
/// use kvclone_transport::{Endpoint, InprocTransport};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let transport = Arc::new(InprocTransport::new());
/// let config = ServerConfig::new(Endpoint::inproc("state"));
/// let server = CloneServer::new(config, transport).unwrap().start().await.unwrap();
///
/// let handle = server.handle();
/// handle.set("config.port", "8080", None).await.unwrap();
/// assert_eq!(handle.stats().await.unwrap().keys, 1);
///
/// server.shutdown().await;
/// # }
/// ```
pub struct CloneServer<T: Transport> {
    config: ServerConfig,
    transport: Arc<T>,
}

impl<T: Transport> CloneServer<T> {
    /// Creates a server after validating `config`.
    pub fn new(config: ServerConfig, transport: Arc<T>) -> ServerResult<Self> {
        config.validate()?;
        Ok(Self { config, transport })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the endpoint and spawns the event loop.
    pub async fn start(self) -> ServerResult<RunningServer> {
        let sockets = self.transport.bind(&self.config.endpoint).await?;
        let handler = StateHandler::new(&self.config);
        let server_id = handler.server_id().to_string();
        let (commands, control) = mpsc::channel(self.config.control_capacity);

        info!(
            endpoint = %self.config.endpoint,
            server_id = %server_id,
            "clone server started"
        );

        let event_loop = EventLoop {
            sockets,
            handler,
            control,
            transfers: JoinSet::new(),
            heartbeat_interval: self.config.heartbeat_interval,
            ttl_scan_interval: self.config.ttl_scan_interval,
        };
        let task = tokio::spawn(event_loop.run());

        Ok(RunningServer {
            handle: ServerHandle {
                commands,
                endpoint: self.config.endpoint,
                server_id: Arc::from(server_id),
            },
            task,
        })
    }
}

/// A started server.
///
/// The loop runs until [`RunningServer::shutdown`] is called or every
/// [`ServerHandle`] (including this one) is dropped.
pub struct RunningServer {
    handle: ServerHandle,
    task: JoinHandle<()>,
}

impl RunningServer {
    /// Returns a control handle.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Returns the bound endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.handle.endpoint
    }

    /// Returns this instance's id.
    pub fn server_id(&self) -> &str {
        &self.handle.server_id
    }

    /// Stops the loop and waits for it to release the endpoint.
    pub async fn shutdown(self) {
        let _ = self.handle.commands.send(ControlCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "server task ended abnormally");
        }
    }
}

/// Handle for driving a running server from the embedding process.
#[derive(Clone)]
pub struct ServerHandle {
    commands: mpsc::Sender<ControlCommand>,
    endpoint: Endpoint,
    server_id: Arc<str>,
}

impl ServerHandle {
    /// Returns the bound endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the server instance id.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Sets `key` and publishes the update. Returns the assigned sequence.
    pub async fn set(
        &self,
        key: impl Into<String>,
        body: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> ServerResult<u64> {
        let mut record = UpdateRecord::new(key, body);
        if let Some(ttl) = ttl {
            record = record.with_ttl(ttl);
        }
        self.publish(record).await
    }

    /// Deletes `key` and publishes the deletion. Returns the assigned sequence.
    pub async fn delete(&self, key: impl Into<String>) -> ServerResult<u64> {
        self.publish(UpdateRecord::delete(key)).await
    }

    /// Publishes `record` as if a client had pushed it.
    pub async fn publish(&self, record: UpdateRecord) -> ServerResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::Publish { record, reply }).await?;
        rx.await.map_err(|_| ServerError::Closed)?
    }

    /// Returns the current records under `subtree`.
    pub async fn snapshot(&self, subtree: impl Into<String>) -> ServerResult<Vec<UpdateRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::Snapshot {
            subtree: subtree.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ServerError::Closed)
    }

    /// Returns the server counters.
    pub async fn stats(&self) -> ServerResult<ServerStats> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::Stats { reply }).await?;
        rx.await.map_err(|_| ServerError::Closed)
    }

    /// Asks the loop to stop. Returns once the request is queued.
    pub async fn shutdown(&self) -> ServerResult<()> {
        self.send(ControlCommand::Shutdown).await
    }

    async fn send(&self, command: ControlCommand) -> ServerResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServerError::Closed)
    }
}

struct EventLoop {
    sockets: ServerSockets,
    handler: StateHandler,
    control: mpsc::Receiver<ControlCommand>,
    /// In-flight snapshot replies, one task per requesting peer.
    /// Dropped with the loop, which aborts them.
    transfers: JoinSet<()>,
    heartbeat_interval: Duration,
    ttl_scan_interval: Duration,
}

impl EventLoop {
    async fn run(mut self) {
        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ttl_scan = tokio::time::interval(self.ttl_scan_interval);
        ttl_scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.sockets.snapshot.recv() => match request {
                    Ok((peer, frames)) => self.serve_snapshot(peer, &frames),
                    Err(e) => {
                        warn!(error = %e, "snapshot socket closed");
                        break;
                    }
                },
                update = self.sockets.collector.recv() => match update {
                    Ok(frames) => match self.handler.handle_collected(&frames) {
                        Ok(published) => {
                            self.sockets.publisher.publish(published);
                        }
                        Err(e) => {
                            self.handler.note_dropped();
                            warn!(error = %e, "dropping collected update");
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "collector socket closed");
                        break;
                    }
                },
                _ = ttl_scan.tick() => {
                    for published in self.handler.flush_ttl(Instant::now().into_std()) {
                        self.sockets.publisher.publish(published);
                    }
                }
                _ = heartbeat.tick() => match self.handler.heartbeat() {
                    Ok(frames) => {
                        self.sockets.publisher.publish(frames);
                    }
                    Err(e) => warn!(error = %e, "could not encode heartbeat"),
                },
                command = self.control.recv() => match command {
                    Some(ControlCommand::Shutdown) | None => break,
                    Some(command) => self.handle_control(command),
                },
                Some(done) = self.transfers.join_next(), if !self.transfers.is_empty() => {
                    if let Err(e) = done {
                        warn!(error = %e, "snapshot transfer task failed");
                    }
                }
            }
        }

        let stats = self.handler.stats();
        info!(
            sequence = stats.sequence,
            keys = stats.keys,
            "clone server stopped"
        );
    }

    /// Encodes the snapshot now and hands delivery to a transfer task, so a
    /// peer that stops reading cannot stall the loop.
    fn serve_snapshot(&mut self, peer: PeerId, frames: &[Bytes]) {
        let replies = match self.handler.handle_snapshot_request(frames) {
            Ok(replies) => replies,
            Err(e) => {
                self.handler.note_dropped();
                warn!(%peer, error = %e, "dropping snapshot request");
                return;
            }
        };
        let replier = self.sockets.snapshot.replier();
        self.transfers.spawn(async move {
            let total = replies.len();
            for reply in replies {
                if let Err(e) = replier.send(peer, reply).await {
                    debug!(%peer, error = %e, "snapshot transfer abandoned");
                    return;
                }
            }
            debug!(%peer, messages = total, "snapshot transfer complete");
        });
    }

    fn handle_control(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Publish { record, reply } => {
                let result = self.handler.publish(record).map(|frames| {
                    self.sockets.publisher.publish(frames);
                    self.handler.sequence()
                });
                let _ = reply.send(result);
            }
            ControlCommand::Snapshot { subtree, reply } => {
                let records = self
                    .handler
                    .store()
                    .snapshot_prefix(&subtree)
                    .cloned()
                    .collect();
                let _ = reply.send(records);
            }
            ControlCommand::Stats { reply } => {
                let _ = reply.send(self.handler.stats());
            }
            ControlCommand::Shutdown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvclone_codec::{decode_record, encode_record, SnapshotRequest};
    use kvclone_transport::InprocTransport;

    fn config(name: &str) -> ServerConfig {
        ServerConfig::new(Endpoint::inproc(name))
            .with_heartbeat_interval(Duration::from_millis(50))
            .with_ttl_scan_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let transport = Arc::new(InprocTransport::new());
        let config = config("bad").with_ttl_scan_interval(Duration::ZERO);
        assert!(CloneServer::new(config, transport).is_err());
    }

    #[tokio::test]
    async fn handle_set_and_snapshot() {
        let transport = Arc::new(InprocTransport::new());
        let server = CloneServer::new(config("handle"), transport)
            .unwrap()
            .start()
            .await
            .unwrap();
        let handle = server.handle();

        assert_eq!(handle.set("a.1", "v1", None).await.unwrap(), 1);
        assert_eq!(handle.set("b.1", "v2", None).await.unwrap(), 2);
        assert_eq!(handle.delete("b.1").await.unwrap(), 3);

        let records = handle.snapshot("").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "a.1");

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.sequence, 3);
        assert_eq!(stats.keys, 1);

        server.shutdown().await;
        assert!(matches!(handle.stats().await, Err(ServerError::Closed)));
    }

    #[tokio::test]
    async fn serves_snapshot_over_sockets() {
        let transport = Arc::new(InprocTransport::new());
        let endpoint = Endpoint::inproc("snap");
        let server = CloneServer::new(config("snap"), transport.clone())
            .unwrap()
            .start()
            .await
            .unwrap();
        server.handle().set("k", "v", None).await.unwrap();

        let mut client = transport.connect(&endpoint, &[String::new()]).await.unwrap();
        client
            .snapshot
            .send(SnapshotRequest::new("").encode())
            .await
            .unwrap();

        let first = decode_record(&client.snapshot.recv().await.unwrap()).unwrap();
        assert_eq!(first.key, "k");
        let sentinel = decode_record(&client.snapshot.recv().await.unwrap()).unwrap();
        assert!(sentinel.is_sentinel());
        assert_eq!(sentinel.sequence, 1);
        assert_eq!(sentinel.properties.uuid(), Some(server.server_id()));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn publishes_collected_updates_and_survives_garbage() {
        let transport = Arc::new(InprocTransport::new());
        let endpoint = Endpoint::inproc("collect");
        let server = CloneServer::new(config("collect"), transport.clone())
            .unwrap()
            .start()
            .await
            .unwrap();
        let prefixes = vec!["k".to_string()];
        let mut client = transport.connect(&endpoint, &prefixes).await.unwrap();

        client
            .updates
            .send(vec![Bytes::from_static(b"garbage")])
            .await
            .unwrap();
        client
            .updates
            .send(encode_record(&UpdateRecord::new("k", "v")).unwrap())
            .await
            .unwrap();

        let published = decode_record(&client.subscriber.recv().await.unwrap()).unwrap();
        assert_eq!(published.key, "k");
        assert_eq!(published.sequence, 1);

        let stats = server.handle().stats().await.unwrap();
        assert_eq!(stats.malformed_dropped, 1);
        assert_eq!(stats.updates_collected, 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn publishes_heartbeats() {
        let transport = Arc::new(InprocTransport::new());
        let endpoint = Endpoint::inproc("hugz");
        let server = CloneServer::new(config("hugz"), transport.clone())
            .unwrap()
            .start()
            .await
            .unwrap();
        let prefixes = vec!["HUGZ".to_string()];
        let mut client = transport.connect(&endpoint, &prefixes).await.unwrap();

        let heartbeat = tokio::time::timeout(Duration::from_secs(2), client.subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        let heartbeat = decode_record(&heartbeat).unwrap();
        assert!(heartbeat.is_heartbeat());
        assert_eq!(heartbeat.properties.uuid(), Some(server.server_id()));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_endpoint() {
        let transport = Arc::new(InprocTransport::new());
        let endpoint = Endpoint::inproc("release");
        let server = CloneServer::new(config("release"), transport.clone())
            .unwrap()
            .start()
            .await
            .unwrap();
        server.shutdown().await;
        assert!(!transport.is_bound(&endpoint));

        let again = CloneServer::new(config("release"), transport)
            .unwrap()
            .start()
            .await
            .unwrap();
        again.shutdown().await;
    }

    #[tokio::test]
    async fn keeps_running_after_caller_drops_transport() {
        let server = CloneServer::new(config("owned"), Arc::new(InprocTransport::new()))
            .unwrap()
            .start()
            .await
            .unwrap();
        let handle = server.handle();

        // Several heartbeat and ttl ticks pass with nothing connected.
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.set("k", "v", None).await.unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(1), handle.stats())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.keys, 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn stalled_snapshot_reader_does_not_block_loop() {
        let transport = Arc::new(InprocTransport::with_capacity(1));
        let endpoint = Endpoint::inproc("stall");
        let server = CloneServer::new(config("stall"), transport.clone())
            .unwrap()
            .start()
            .await
            .unwrap();
        let handle = server.handle();
        for i in 0..4 {
            handle.set(format!("k{}", i), "v", None).await.unwrap();
        }

        // This client asks for a snapshot and never reads the replies.
        let stalled = transport.connect(&endpoint, &[String::new()]).await.unwrap();
        stalled
            .snapshot
            .send(SnapshotRequest::new("").encode())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = tokio::time::timeout(Duration::from_secs(1), handle.stats())
            .await
            .expect("control stalled behind a snapshot transfer")
            .unwrap();
        assert_eq!(stats.keys, 4);

        let mut healthy = transport.connect(&endpoint, &[String::new()]).await.unwrap();
        healthy
            .snapshot
            .send(SnapshotRequest::new("").encode())
            .await
            .unwrap();
        let mut keys = Vec::new();
        loop {
            let frames = tokio::time::timeout(Duration::from_secs(1), healthy.snapshot.recv())
                .await
                .unwrap()
                .unwrap();
            let record = decode_record(&frames).unwrap();
            if record.is_sentinel() {
                assert_eq!(record.sequence, 4);
                break;
            }
            keys.push(record.key);
        }
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3"]);

        drop(stalled);
        server.shutdown().await;
    }
}
