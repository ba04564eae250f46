//! Socket handles.
//!
//! Every fabric hands out the same handle types, backed by tokio channels:
//!
//! | Server side      | Client side      | Pattern            |
//! |------------------|------------------|--------------------|
//! | [`RouterSocket`] | [`DealerSocket`] | addressed request/response |
//! | [`PubSocket`]    | [`SubSocket`]    | prefix-filtered fan-out    |
//! | [`PullSocket`]   | [`PushSocket`]   | fan-in of pushed updates   |
//!
//! Receiving on several handles at once is done with `tokio::select!`.

use crate::error::{TransportError, TransportResult};
use bytes::Bytes;
use kvclone_codec::Frames;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::warn;

/// Opaque identity of a connected requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Creates a peer id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Returns true if the first frame starts with any of `prefixes`.
pub fn topic_matches(prefixes: &[Bytes], frames: &[Bytes]) -> bool {
    frames
        .first()
        .is_some_and(|topic| prefixes.iter().any(|p| topic.starts_with(p)))
}

/// Reply channels of the peers connected to a router.
#[derive(Clone, Default)]
pub(crate) struct PeerTable {
    peers: Arc<Mutex<HashMap<PeerId, mpsc::Sender<Frames>>>>,
}

impl PeerTable {
    pub(crate) fn register(&self, peer: PeerId, reply: mpsc::Sender<Frames>) {
        self.peers.lock().insert(peer, reply);
    }

    pub(crate) fn remove(&self, peer: PeerId) {
        self.peers.lock().remove(&peer);
    }

    pub(crate) fn clear(&self) {
        self.peers.lock().clear();
    }

    fn get(&self, peer: PeerId) -> Option<mpsc::Sender<Frames>> {
        self.peers.lock().get(&peer).cloned()
    }
}

/// Client-side view of whether the fabric has cut this connection.
#[derive(Clone, Default)]
pub(crate) struct Link {
    severed: Option<watch::Receiver<bool>>,
}

impl Link {
    pub(crate) fn watch(severed: watch::Receiver<bool>) -> Self {
        Self {
            severed: Some(severed),
        }
    }

    fn is_severed(&self) -> bool {
        self.severed
            .as_ref()
            .is_some_and(|rx| *rx.borrow() || rx.has_changed().is_err())
    }

    /// Resolves once the link is cut. Never resolves for unmanaged links.
    async fn severed(&mut self) {
        match self.severed.as_mut() {
            Some(rx) => {
                let _ = rx.wait_for(|severed| *severed).await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Keeps fabric-side resources alive as long as a socket bundle exists.
#[derive(Default)]
pub(crate) struct Resources(Vec<Box<dyn Any + Send>>);

impl Resources {
    pub(crate) fn push(&mut self, resource: impl Any + Send) {
        self.0.push(Box::new(resource));
    }
}

/// Aborts a background task when dropped.
pub(crate) struct TaskGuard(tokio::task::AbortHandle);

impl TaskGuard {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future).abort_handle())
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Server side of addressed request/response.
pub struct RouterSocket {
    pub(crate) incoming: mpsc::Receiver<(PeerId, Frames)>,
    pub(crate) peers: PeerTable,
}

impl RouterSocket {
    /// Receives the next request and the identity of its sender.
    pub async fn recv(&mut self) -> TransportResult<(PeerId, Frames)> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }

    /// Sends a reply to `peer`.
    ///
    /// Waits while the peer's reply buffer is full.
    pub async fn send(&self, peer: PeerId, frames: Frames) -> TransportResult<()> {
        self.replier().send(peer, frames).await
    }

    /// Returns a handle that can send replies from another task.
    pub fn replier(&self) -> Replier {
        Replier {
            peers: self.peers.clone(),
        }
    }
}

/// Detached reply side of a [`RouterSocket`].
///
/// A slow peer only stalls the task that is sending to it.
#[derive(Clone)]
pub struct Replier {
    peers: PeerTable,
}

impl Replier {
    /// Sends a reply to `peer`, waiting while its reply buffer is full.
    pub async fn send(&self, peer: PeerId, frames: Frames) -> TransportResult<()> {
        let reply = self.peers.get(peer).ok_or(TransportError::UnknownPeer(peer))?;
        reply
            .send(frames)
            .await
            .map_err(|_| TransportError::UnknownPeer(peer))
    }

    /// Returns true while `peer` is connected.
    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers.get(peer).is_some_and(|reply| !reply.is_closed())
    }
}

impl fmt::Debug for Replier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replier")
            .field("peers", &self.peers.peers.lock().len())
            .finish()
    }
}

/// Client side of addressed request/response.
pub struct DealerSocket {
    pub(crate) peer: PeerId,
    pub(crate) requests: mpsc::Sender<(PeerId, Frames)>,
    pub(crate) replies: mpsc::Receiver<Frames>,
    pub(crate) link: Link,
}

impl DealerSocket {
    /// Sends a request to the server.
    pub async fn send(&self, frames: Frames) -> TransportResult<()> {
        if self.link.is_severed() {
            return Err(TransportError::Closed);
        }
        self.requests
            .send((self.peer, frames))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Receives the next reply.
    pub async fn recv(&mut self) -> TransportResult<Frames> {
        tokio::select! {
            _ = self.link.severed() => Err(TransportError::Closed),
            reply = self.replies.recv() => reply.ok_or(TransportError::Closed),
        }
    }
}

/// Server side of fan-out publishing.
pub struct PubSocket {
    pub(crate) sender: broadcast::Sender<Frames>,
}

impl PubSocket {
    /// Publishes `frames` to every subscriber whose prefix matches the first
    /// frame. Returns the number of subscribers the message was queued for.
    pub fn publish(&self, frames: Frames) -> usize {
        // No subscribers is not an error for a publisher.
        self.sender.send(frames).unwrap_or(0)
    }

    /// Returns the number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub(crate) enum SubSource {
    Broadcast(broadcast::Receiver<Frames>),
    Stream(mpsc::Receiver<Frames>),
}

impl SubSource {
    async fn recv(&mut self) -> TransportResult<Frames> {
        match self {
            SubSource::Broadcast(rx) => match rx.recv().await {
                Ok(frames) => Ok(frames),
                Err(RecvError::Lagged(skipped)) => {
                    // Missed updates cannot be replayed; treat as a lost link.
                    warn!(skipped, "subscriber fell behind, closing");
                    Err(TransportError::Closed)
                }
                Err(RecvError::Closed) => Err(TransportError::Closed),
            },
            SubSource::Stream(rx) => rx.recv().await.ok_or(TransportError::Closed),
        }
    }
}

/// Client side of fan-out publishing, filtered by topic prefix.
pub struct SubSocket {
    pub(crate) source: SubSource,
    pub(crate) prefixes: Vec<Bytes>,
    pub(crate) link: Link,
}

impl SubSocket {
    /// Receives the next published message matching a subscribed prefix.
    pub async fn recv(&mut self) -> TransportResult<Frames> {
        loop {
            let frames = tokio::select! {
                _ = self.link.severed() => return Err(TransportError::Closed),
                frames = self.source.recv() => frames?,
            };
            if topic_matches(&self.prefixes, &frames) {
                return Ok(frames);
            }
        }
    }

    /// Returns the subscribed prefixes.
    pub fn prefixes(&self) -> &[Bytes] {
        &self.prefixes
    }
}

/// Client side of update push.
pub struct PushSocket {
    pub(crate) sender: mpsc::Sender<Frames>,
    pub(crate) link: Link,
}

impl PushSocket {
    /// Pushes an update to the server's collector.
    pub async fn send(&self, frames: Frames) -> TransportResult<()> {
        if self.link.is_severed() {
            return Err(TransportError::Closed);
        }
        self.sender
            .send(frames)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Server side of update push.
pub struct PullSocket {
    pub(crate) receiver: mpsc::Receiver<Frames>,
}

impl PullSocket {
    /// Receives the next pushed update.
    pub async fn recv(&mut self) -> TransportResult<Frames> {
        self.receiver.recv().await.ok_or(TransportError::Closed)
    }
}

/// The sockets a bound server listens on.
///
/// Dropping the bundle unbinds the endpoint.
pub struct ServerSockets {
    /// Snapshot requests in, snapshot records out.
    pub snapshot: RouterSocket,
    /// Live update fan-out.
    pub publisher: PubSocket,
    /// Updates pushed by clients.
    pub collector: PullSocket,
    pub(crate) resources: Resources,
}

/// The sockets a client holds for one server connection.
///
/// Dropping the bundle closes the connection.
pub struct ClientSockets {
    /// Snapshot requests out, snapshot records in.
    pub snapshot: DealerSocket,
    /// Live updates matching the subscribed prefixes.
    pub subscriber: SubSocket,
    /// Update push to the server's collector.
    pub updates: PushSocket,
    pub(crate) resources: Resources,
}

impl fmt::Debug for ServerSockets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSockets")
            .field("subscribers", &self.publisher.subscriber_count())
            .field("resources", &self.resources.0.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ClientSockets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSockets")
            .field("peer", &self.snapshot.peer)
            .field("prefixes", &self.subscriber.prefixes)
            .finish_non_exhaustive()
    }
}
