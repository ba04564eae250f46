//! The background agent.
//!
//! The agent owns the local store and every socket. It moves between
//! `Disconnected`, `SnapshotSync`, and `Subscribed`, and serves commands from
//! [`CloneClient`](crate::CloneClient) handles in every state.

use crate::config::{ClientConfig, WriteMode};
use crate::error::{ClientError, ClientResult};
use crate::state::{ClientStatus, ConnectionState, SyncState};
use kvclone_codec::{RecordCodec, SnapshotRequest, UpdateRecord, HEARTBEAT_KEY};
use kvclone_core::Store;
use kvclone_transport::{ClientSockets, Endpoint, PushSocket, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Requests from client handles to the agent.
pub(crate) enum Command {
    Set {
        record: UpdateRecord,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Get {
        key: String,
        reply: oneshot::Sender<Option<UpdateRecord>>,
    },
    Entries {
        reply: oneshot::Sender<Vec<UpdateRecord>>,
    },
    AddEndpoint {
        endpoint: Endpoint,
        reply: oneshot::Sender<bool>,
    },
    RemoveEndpoint {
        endpoint: Endpoint,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// What to do after a command has been handled.
enum Flow {
    Continue,
    /// The endpoint in use was removed.
    Reconnect,
    Shutdown,
}

enum Connect {
    Ready(ClientSockets),
    Failed(TransportError),
    Abandoned,
    Shutdown,
}

/// Why a session with a server ended.
enum SessionEnd {
    Lost(&'static str),
    Restarted,
    Abandoned,
    Shutdown,
}

pub(crate) struct Agent<T: Transport> {
    config: ClientConfig,
    transport: Arc<T>,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<ClientStatus>,
    codec: RecordCodec,
    store: Store,
    servers: Vec<ConnectionState>,
    current: usize,
    state: SyncState,
    endpoint: Option<Endpoint>,
    cursor: u64,
    server_id: Option<String>,
    pending: VecDeque<UpdateRecord>,
    reconnects: u64,
}

impl<T: Transport> Agent<T> {
    pub(crate) fn new(
        config: ClientConfig,
        transport: Arc<T>,
        commands: mpsc::Receiver<Command>,
        status: watch::Sender<ClientStatus>,
    ) -> Self {
        let servers = config
            .endpoints
            .iter()
            .cloned()
            .map(ConnectionState::new)
            .collect();
        Self {
            codec: RecordCodec::new(config.max_key_len),
            config,
            transport,
            commands,
            status,
            store: Store::new(),
            servers,
            current: 0,
            state: SyncState::Disconnected,
            endpoint: None,
            cursor: 0,
            server_id: None,
            pending: VecDeque::new(),
            reconnects: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            subtree = %self.config.subtree,
            endpoints = self.servers.len(),
            "clone agent started"
        );

        loop {
            let Some(index) = self.wait_for_attempt().await else {
                break;
            };
            let endpoint = self.servers[index].endpoint.clone();
            self.endpoint = Some(endpoint.clone());
            self.publish_status();

            let sockets = match self.connect(&endpoint).await {
                Connect::Ready(sockets) => sockets,
                Connect::Failed(e) => {
                    warn!(%endpoint, error = %e, "connect failed");
                    self.record_failure(&endpoint);
                    continue;
                }
                Connect::Abandoned => continue,
                Connect::Shutdown => break,
            };

            let end = self.session(sockets, &endpoint).await;
            self.state = SyncState::Disconnected;
            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(reason) => {
                    warn!(%endpoint, reason, "connection lost");
                    self.reconnects += 1;
                    self.record_failure(&endpoint);
                }
                SessionEnd::Restarted => {
                    info!(%endpoint, "server restarted, resyncing");
                    self.reconnects += 1;
                    if let Some(pos) = self.position(&endpoint) {
                        self.current = pos;
                    }
                }
                SessionEnd::Abandoned => {
                    debug!(%endpoint, "endpoint removed, moving on");
                    self.reconnects += 1;
                }
            }
            self.publish_status();
        }

        self.state = SyncState::Disconnected;
        self.publish_status();
        info!(keys = self.store.len(), "clone agent stopped");
    }

    /// Waits in `Disconnected` until the current endpoint's backoff elapses.
    /// Returns `None` on shutdown.
    async fn wait_for_attempt(&mut self) -> Option<usize> {
        loop {
            if self.servers.is_empty() {
                // Nothing to connect to until an endpoint is added.
                let command = self.commands.recv().await;
                if let Flow::Shutdown = self.dispatch(command, None).await {
                    return None;
                }
                continue;
            }

            let index = self.current % self.servers.len();
            let at = self.servers[index].next_attempt();
            tokio::select! {
                _ = tokio::time::sleep_until(at) => return Some(index),
                command = self.commands.recv() => {
                    if let Flow::Shutdown = self.dispatch(command, None).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn connect(&mut self, endpoint: &Endpoint) -> Connect {
        let transport = Arc::clone(&self.transport);
        let target = endpoint.clone();
        let prefixes = vec![self.config.subtree.clone(), HEARTBEAT_KEY.to_string()];
        let connecting = async move { transport.connect(&target, &prefixes).await };
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(sockets) => Connect::Ready(sockets),
                        Err(e) => Connect::Failed(e),
                    };
                }
                command = self.commands.recv() => match self.dispatch(command, None).await {
                    Flow::Continue => {}
                    Flow::Reconnect => return Connect::Abandoned,
                    Flow::Shutdown => return Connect::Shutdown,
                },
            }
        }
    }

    async fn session(&mut self, mut sockets: ClientSockets, endpoint: &Endpoint) -> SessionEnd {
        self.state = SyncState::SnapshotSync;
        self.publish_status();

        // The subscriber is already live, so nothing published from here on
        // is missed.
        let request = SnapshotRequest::new(self.config.subtree.clone()).encode();
        if sockets.snapshot.send(request).await.is_err() {
            return SessionEnd::Lost("snapshot request failed");
        }
        debug!(%endpoint, subtree = %self.config.subtree, "snapshot requested");

        let liveness = self.config.liveness_timeout();
        let mut deadline = Instant::now() + liveness;
        let mut staging = Store::new();
        let mut early = Vec::new();

        let sentinel = loop {
            tokio::select! {
                reply = sockets.snapshot.recv() => {
                    let Ok(frames) = reply else {
                        return SessionEnd::Lost("snapshot socket closed");
                    };
                    deadline = Instant::now() + liveness;
                    match self.codec.decode(&frames) {
                        Ok(record) if record.is_sentinel() => break record,
                        Ok(record) if record.in_subtree(&self.config.subtree) => {
                            staging.apply(record);
                        }
                        Ok(record) => {
                            debug!(key = %record.key, "ignoring snapshot record outside subtree");
                        }
                        Err(e) => warn!(error = %e, "dropping malformed snapshot frame"),
                    }
                }
                update = sockets.subscriber.recv() => {
                    let Ok(frames) = update else {
                        return SessionEnd::Lost("subscriber closed");
                    };
                    deadline = Instant::now() + liveness;
                    match self.codec.decode(&frames) {
                        Ok(record) if record.is_heartbeat() => {}
                        Ok(_) if early.len() >= self.config.max_buffered_updates => {
                            return SessionEnd::Lost("update backlog overflowed during snapshot");
                        }
                        Ok(record) => early.push(record),
                        Err(e) => warn!(error = %e, "dropping malformed update"),
                    }
                }
                command = self.commands.recv() => match self.dispatch(command, None).await {
                    Flow::Continue => {}
                    Flow::Reconnect => return SessionEnd::Abandoned,
                    Flow::Shutdown => return SessionEnd::Shutdown,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    return SessionEnd::Lost("snapshot timed out");
                }
            }
        };

        self.store = staging;
        self.cursor = sentinel.sequence;
        self.server_id = sentinel.properties.uuid().map(str::to_string);
        for record in early {
            self.apply_live(record);
        }
        if let Some(pos) = self.position(endpoint) {
            self.servers[pos].record_success();
        }
        self.state = SyncState::Subscribed;
        info!(
            %endpoint,
            keys = self.store.len(),
            cursor = self.cursor,
            "snapshot applied, subscribed"
        );

        while let Some(record) = self.pending.pop_front() {
            let frames = match self.codec.encode(&record) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(key = %record.key, error = %e, "dropping queued write");
                    continue;
                }
            };
            if sockets.updates.send(frames).await.is_err() {
                self.pending.push_front(record);
                return SessionEnd::Lost("update push failed");
            }
        }
        self.publish_status();

        loop {
            tokio::select! {
                update = sockets.subscriber.recv() => {
                    let Ok(frames) = update else {
                        return SessionEnd::Lost("subscriber closed");
                    };
                    deadline = Instant::now() + liveness;
                    match self.codec.decode(&frames) {
                        Ok(record) if record.is_heartbeat() => {
                            if self.server_changed(&record) {
                                return SessionEnd::Restarted;
                            }
                        }
                        Ok(record) => self.apply_live(record),
                        Err(e) => warn!(error = %e, "dropping malformed update"),
                    }
                }
                command = self.commands.recv() => {
                    match self.dispatch(command, Some(&sockets.updates)).await {
                        Flow::Continue => {}
                        Flow::Reconnect => return SessionEnd::Abandoned,
                        Flow::Shutdown => return SessionEnd::Shutdown,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return SessionEnd::Lost("server silent");
                }
            }
        }
    }

    /// Returns true if a heartbeat comes from a different server instance
    /// than the one the snapshot came from.
    fn server_changed(&mut self, heartbeat: &UpdateRecord) -> bool {
        let Some(seen) = heartbeat.properties.uuid() else {
            return false;
        };
        match self.server_id.as_deref() {
            Some(known) => known != seen,
            None => {
                self.server_id = Some(seen.to_string());
                self.publish_status();
                false
            }
        }
    }

    fn apply_live(&mut self, record: UpdateRecord) {
        if record.is_sentinel() || !record.in_subtree(&self.config.subtree) {
            trace!(key = %record.key, "ignoring update outside subtree");
            return;
        }
        if record.sequence <= self.cursor {
            trace!(
                key = %record.key,
                sequence = record.sequence,
                cursor = self.cursor,
                "ignoring stale update"
            );
            return;
        }
        self.cursor = record.sequence;
        self.store.apply(record);
        self.publish_status();
    }

    async fn dispatch(&mut self, command: Option<Command>, updates: Option<&PushSocket>) -> Flow {
        let Some(command) = command else {
            // Every handle is gone.
            return Flow::Shutdown;
        };
        match command {
            Command::Set { record, reply } => {
                let result = self.write(record, updates).await;
                let _ = reply.send(result);
                Flow::Continue
            }
            Command::Get { key, reply } => {
                let _ = reply.send(self.store.get(&key).cloned());
                Flow::Continue
            }
            Command::Entries { reply } => {
                let _ = reply.send(self.store.snapshot().cloned().collect());
                Flow::Continue
            }
            Command::AddEndpoint { endpoint, reply } => {
                let added = self.position(&endpoint).is_none();
                if added {
                    info!(%endpoint, "endpoint added");
                    self.servers.push(ConnectionState::new(endpoint));
                }
                let _ = reply.send(added);
                Flow::Continue
            }
            Command::RemoveEndpoint { endpoint, reply } => {
                let Some(pos) = self.position(&endpoint) else {
                    let _ = reply.send(false);
                    return Flow::Continue;
                };
                self.servers.remove(pos);
                if pos < self.current {
                    self.current -= 1;
                }
                info!(%endpoint, "endpoint removed");
                let _ = reply.send(true);
                if self.endpoint.as_ref() == Some(&endpoint) {
                    Flow::Reconnect
                } else {
                    Flow::Continue
                }
            }
            Command::Shutdown => Flow::Shutdown,
        }
    }

    async fn write(&mut self, record: UpdateRecord, updates: Option<&PushSocket>) -> ClientResult<()> {
        if self.config.write_mode == WriteMode::LocalOnly {
            self.store.apply(record);
            self.publish_status();
            return Ok(());
        }

        match updates {
            // Keep order behind anything still queued.
            Some(updates) if self.pending.is_empty() => {
                let frames = self.codec.encode(&record)?;
                if updates.send(frames).await.is_err() {
                    debug!(key = %record.key, "push failed, queueing write");
                    self.enqueue(record)?;
                }
                Ok(())
            }
            _ => self.enqueue(record),
        }
    }

    fn enqueue(&mut self, record: UpdateRecord) -> ClientResult<()> {
        if self.pending.len() >= self.config.max_pending_writes {
            return Err(ClientError::PendingQueueFull {
                max: self.config.max_pending_writes,
            });
        }
        self.pending.push_back(record);
        self.publish_status();
        Ok(())
    }

    fn position(&self, endpoint: &Endpoint) -> Option<usize> {
        self.servers.iter().position(|s| &s.endpoint == endpoint)
    }

    /// Backs off `endpoint` and moves on to the next one.
    fn record_failure(&mut self, endpoint: &Endpoint) {
        if let Some(pos) = self.position(endpoint) {
            self.servers[pos].record_failure(&self.config.retry);
            debug!(
                %endpoint,
                failures = self.servers[pos].failures(),
                "endpoint backing off"
            );
            self.current = pos + 1;
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(ClientStatus {
            state: self.state,
            endpoint: self.endpoint.clone(),
            cursor: self.cursor,
            server_id: self.server_id.clone(),
            reconnects: self.reconnects,
            keys: self.store.len(),
            pending_writes: self.pending.len(),
        });
    }
}
