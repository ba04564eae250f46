//! Caller-facing client handle.

use crate::agent::{Agent, Command};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::state::{ClientStatus, SyncState};
use bytes::Bytes;
use kvclone_codec::{RecordCodec, UpdateRecord, HEARTBEAT_KEY};
use kvclone_transport::{Endpoint, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// A replica of a kvclone server's key-value state.
///
/// Starting a client spawns an agent task that connects to the configured
/// endpoints, loads a snapshot of the subtree, and then follows live updates.
/// The handle is cheap to clone; every clone talks to the same agent.
///
/// Reads are served from the local replica. Writes in
/// [`WriteMode::Push`](crate::WriteMode::Push) go to the server and become
/// visible locally once the server publishes them back. Writes in
/// [`WriteMode::LocalOnly`](crate::WriteMode::LocalOnly) only change the local
/// replica and are replaced by the next snapshot.
///
/// # Example
///
/// ```
/// use kvclone_client::{ClientConfig, CloneClient, SyncState};
/// use kvclone_server::{CloneServer, ServerConfig};
/// use kvclone_transport::{Endpoint, InprocTransport};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let transport = Arc::new(InprocTransport::new());
/// let endpoint = Endpoint::inproc("state");
/// let server = CloneServer::new(ServerConfig::new(endpoint.clone()), transport.clone())
///     .unwrap()
///     .start()
///     .await
///     .unwrap();
///
/// let client = CloneClient::start(ClientConfig::new([endpoint]), transport).unwrap();
/// client.wait_for_state(SyncState::Subscribed).await.unwrap();
/// client.shutdown().await;
/// server.shutdown().await;
/// # }
/// ```
#[derive(Clone)]
pub struct CloneClient {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ClientStatus>,
    codec: RecordCodec,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CloneClient {
    /// Validates `config` and starts the agent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T: Transport>(config: ClientConfig, transport: Arc<T>) -> ClientResult<Self> {
        config.validate()?;
        let (commands, receiver) = mpsc::channel(config.command_capacity);
        let (status_tx, status) = watch::channel(ClientStatus::initial());
        let codec = RecordCodec::new(config.max_key_len);

        let agent = Agent::new(config, transport, receiver, status_tx);
        let task = tokio::spawn(agent.run());

        Ok(Self {
            commands,
            status,
            codec,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Sets `key` to `body`, optionally expiring after `ttl`.
    pub async fn set(
        &self,
        key: impl Into<String>,
        body: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> ClientResult<()> {
        let key = key.into();
        self.check_key(&key)?;
        let mut record = UpdateRecord::new(key, body);
        if let Some(ttl) = ttl {
            record = record.with_ttl(ttl);
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Set { record, reply }).await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Deletes `key`.
    pub async fn delete(&self, key: impl Into<String>) -> ClientResult<()> {
        self.set(key, Bytes::new(), None).await
    }

    /// Returns the locally replicated value of `key`.
    pub async fn get(&self, key: impl Into<String>) -> ClientResult<Option<Bytes>> {
        Ok(self.get_record(key).await?.map(|record| record.body))
    }

    /// Returns the locally replicated record for `key`, with its sequence
    /// and properties.
    pub async fn get_record(&self, key: impl Into<String>) -> ClientResult<Option<UpdateRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get {
            key: key.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Returns every locally replicated record in key order.
    pub async fn entries(&self) -> ClientResult<Vec<UpdateRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Entries { reply }).await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Returns the current status.
    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    /// Returns a receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Waits until the client reaches `state`.
    pub async fn wait_for_state(&self, state: SyncState) -> ClientResult<ClientStatus> {
        self.wait_for(|status| status.state == state).await
    }

    /// Waits until `predicate` holds for the status.
    pub async fn wait_for<F>(&self, mut predicate: F) -> ClientResult<ClientStatus>
    where
        F: FnMut(&ClientStatus) -> bool,
    {
        let mut status = self.status.clone();
        let result = status
            .wait_for(|s| predicate(s))
            .await
            .map(|s| (*s).clone())
            .map_err(|_| ClientError::Closed);
        result
    }

    /// Registers another server endpoint. Returns false if it was already
    /// registered.
    pub async fn add_endpoint(&self, endpoint: Endpoint) -> ClientResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddEndpoint { endpoint, reply }).await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Unregisters an endpoint. If it is the one in use, the client moves on
    /// to the next. Returns false if it was not registered.
    pub async fn remove_endpoint(&self, endpoint: &Endpoint) -> ClientResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RemoveEndpoint {
            endpoint: endpoint.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Stops the agent and waits for it to drop its connection.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "clone agent ended abnormally");
            }
        }
    }

    fn check_key(&self, key: &str) -> ClientResult<()> {
        if key.is_empty() {
            return Err(ClientError::EmptyKey);
        }
        if key == HEARTBEAT_KEY {
            return Err(ClientError::ReservedKey(key.to_string()));
        }
        self.codec.check_key(key)?;
        Ok(())
    }

    async fn send(&self, command: Command) -> ClientResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }
}

impl std::fmt::Debug for CloneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneClient")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}
