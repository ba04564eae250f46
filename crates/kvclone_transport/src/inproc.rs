//! In-process fabric.
//!
//! Servers and clients in the same process meet at a shared hub keyed by
//! endpoint name. Everything is a tokio channel, so ordering and delivery
//! match the TCP fabric without touching the network.

use crate::endpoint::Endpoint;
use crate::error::{TransportError, TransportResult};
use crate::socket::{
    ClientSockets, DealerSocket, Link, PeerId, PeerTable, PubSocket, PullSocket, PushSocket,
    Resources, RouterSocket, ServerSockets, SubSocket, SubSource,
};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use kvclone_codec::Frames;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

/// Default channel capacity for in-process sockets.
pub const DEFAULT_INPROC_CAPACITY: usize = 1024;

/// An in-process transport.
///
/// Cloning shares the hub, so a server bound through one clone is reachable
/// through every other.
///
/// # Example
///
/// ```rust
/// use kvclone_transport::{Endpoint, InprocTransport, Transport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let transport = InprocTransport::new();
/// let endpoint = Endpoint::inproc("state");
/// let server = transport.bind(&endpoint).await.unwrap();
/// let client = transport.connect(&endpoint, &[String::new()]).await.unwrap();
/// # drop((server, client));
/// # }
/// ```
#[derive(Clone)]
pub struct InprocTransport {
    hub: Arc<Hub>,
}

struct Hub {
    endpoints: Mutex<HashMap<String, BoundEndpoint>>,
    next_peer: AtomicU64,
    next_generation: AtomicU64,
    capacity: usize,
}

struct BoundEndpoint {
    generation: u64,
    requests: mpsc::Sender<(PeerId, Frames)>,
    peers: PeerTable,
    publisher: broadcast::Sender<Frames>,
    collector: mpsc::Sender<Frames>,
    links: Vec<watch::Sender<bool>>,
}

impl BoundEndpoint {
    fn sever_all(&mut self) -> usize {
        let live: Vec<_> = self.links.drain(..).filter(|l| !l.is_closed()).collect();
        for link in &live {
            let _ = link.send(true);
        }
        self.peers.clear();
        live.len()
    }
}

/// Unbinds the endpoint when the server's sockets are dropped.
/// Holds the hub alive for as long as the server's sockets exist.
struct Binding {
    hub: Arc<Hub>,
    name: String,
    generation: u64,
}

impl Drop for Binding {
    fn drop(&mut self) {
        let mut endpoints = self.hub.endpoints.lock();
        let current = endpoints
            .get(&self.name)
            .is_some_and(|bound| bound.generation == self.generation);
        if current {
            if let Some(mut bound) = endpoints.remove(&self.name) {
                bound.sever_all();
            }
            debug!(endpoint = %self.name, "inproc endpoint unbound");
        }
    }
}

/// Removes a client's reply channel when its sockets are dropped.
struct PeerRegistration {
    peers: PeerTable,
    peer: PeerId,
}

impl Drop for PeerRegistration {
    fn drop(&mut self) {
        self.peers.remove(self.peer);
    }
}

impl InprocTransport {
    /// Creates a transport with its own hub.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INPROC_CAPACITY)
    }

    /// Creates a transport whose sockets buffer up to `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            hub: Arc::new(Hub {
                endpoints: Mutex::new(HashMap::new()),
                next_peer: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Cuts every client connection to `endpoint` while leaving the server
    /// bound. Returns the number of links that were cut.
    ///
    /// Clients see their sockets close as if the network had dropped them.
    pub fn sever(&self, endpoint: &Endpoint) -> usize {
        let Endpoint::Inproc(name) = endpoint else {
            return 0;
        };
        let severed = self
            .hub
            .endpoints
            .lock()
            .get_mut(name)
            .map(BoundEndpoint::sever_all)
            .unwrap_or(0);
        debug!(%endpoint, severed, "inproc links severed");
        severed
    }

    /// Returns true if a server is bound to `endpoint`.
    pub fn is_bound(&self, endpoint: &Endpoint) -> bool {
        match endpoint {
            Endpoint::Inproc(name) => self.hub.endpoints.lock().contains_key(name),
            Endpoint::Tcp { .. } => false,
        }
    }

    fn name_of(endpoint: &Endpoint) -> TransportResult<&str> {
        match endpoint {
            Endpoint::Inproc(name) => Ok(name),
            other => Err(TransportError::InvalidEndpoint(format!(
                "{} is not an inproc endpoint",
                other
            ))),
        }
    }
}

impl Default for InprocTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InprocTransport {
    async fn bind(&self, endpoint: &Endpoint) -> TransportResult<ServerSockets> {
        let name = Self::name_of(endpoint)?;
        let capacity = self.hub.capacity;

        let mut endpoints = self.hub.endpoints.lock();
        if endpoints.contains_key(name) {
            return Err(TransportError::AddressInUse(endpoint.to_string()));
        }

        let (requests, incoming) = mpsc::channel(capacity);
        let (publisher, _) = broadcast::channel(capacity);
        let (collector, receiver) = mpsc::channel(capacity);
        let peers = PeerTable::default();
        let generation = self.hub.next_generation.fetch_add(1, Ordering::Relaxed);

        endpoints.insert(
            name.to_string(),
            BoundEndpoint {
                generation,
                requests,
                peers: peers.clone(),
                publisher: publisher.clone(),
                collector,
                links: Vec::new(),
            },
        );
        drop(endpoints);

        let mut resources = Resources::default();
        resources.push(Binding {
            hub: Arc::clone(&self.hub),
            name: name.to_string(),
            generation,
        });
        debug!(%endpoint, "inproc endpoint bound");

        Ok(ServerSockets {
            snapshot: RouterSocket { incoming, peers },
            publisher: PubSocket { sender: publisher },
            collector: PullSocket { receiver },
            resources,
        })
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        prefixes: &[String],
    ) -> TransportResult<ClientSockets> {
        let name = Self::name_of(endpoint)?;
        let capacity = self.hub.capacity;

        let mut endpoints = self.hub.endpoints.lock();
        let bound = endpoints
            .get_mut(name)
            .ok_or_else(|| TransportError::ConnectionRefused(endpoint.to_string()))?;

        let peer = PeerId::new(self.hub.next_peer.fetch_add(1, Ordering::Relaxed));
        let (reply_tx, replies) = mpsc::channel(capacity);
        bound.peers.register(peer, reply_tx);

        bound.links.retain(|link| !link.is_closed());
        let (link_tx, link_rx) = watch::channel(false);
        bound.links.push(link_tx);

        // Subscribe before returning so nothing published after connect is missed.
        let subscription = bound.publisher.subscribe();
        let requests = bound.requests.clone();
        let collector = bound.collector.clone();
        let peers = bound.peers.clone();
        drop(endpoints);

        let link = Link::watch(link_rx);
        let mut resources = Resources::default();
        resources.push(PeerRegistration { peers, peer });
        debug!(%endpoint, %peer, "inproc client connected");

        Ok(ClientSockets {
            snapshot: DealerSocket {
                peer,
                requests,
                replies,
                link: link.clone(),
            },
            subscriber: SubSocket {
                source: SubSource::Broadcast(subscription),
                prefixes: prefixes
                    .iter()
                    .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                    .collect(),
                link: link.clone(),
            },
            updates: PushSocket {
                sender: collector,
                link,
            },
            resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frames(parts: &[&'static str]) -> Frames {
        parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect()
    }

    fn all() -> Vec<String> {
        vec![String::new()]
    }

    #[tokio::test]
    async fn bind_twice_fails() {
        let transport = InprocTransport::new();
        let endpoint = Endpoint::inproc("dup");
        let _server = transport.bind(&endpoint).await.unwrap();
        let err = transport.bind(&endpoint).await.unwrap_err();
        assert!(matches!(err, TransportError::AddressInUse(_)));
    }

    #[tokio::test]
    async fn connect_without_server_is_refused() {
        let transport = InprocTransport::new();
        let err = transport
            .connect(&Endpoint::inproc("nobody"), &all())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));
    }

    #[tokio::test]
    async fn tcp_endpoint_rejected() {
        let transport = InprocTransport::new();
        let err = transport
            .bind(&Endpoint::tcp("localhost", 5556))
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn request_reply_is_addressed() {
        let transport = InprocTransport::new();
        let endpoint = Endpoint::inproc("router");
        let mut server = transport.bind(&endpoint).await.unwrap();
        let mut a = transport.connect(&endpoint, &all()).await.unwrap();
        let mut b = transport.connect(&endpoint, &all()).await.unwrap();

        a.snapshot.send(frames(&["from-a"])).await.unwrap();
        b.snapshot.send(frames(&["from-b"])).await.unwrap();

        for _ in 0..2 {
            let (peer, request) = server.snapshot.recv().await.unwrap();
            let mut reply = request.clone();
            reply.push(Bytes::from_static(b"ok"));
            server.snapshot.send(peer, reply).await.unwrap();
        }

        assert_eq!(a.snapshot.recv().await.unwrap(), frames(&["from-a", "ok"]));
        assert_eq!(b.snapshot.recv().await.unwrap(), frames(&["from-b", "ok"]));
    }

    #[tokio::test]
    async fn publish_filters_by_prefix() {
        let transport = InprocTransport::new();
        let endpoint = Endpoint::inproc("pub");
        let server = transport.bind(&endpoint).await.unwrap();
        let prefixes = vec!["a.".to_string(), "HUGZ".to_string()];
        let mut client = transport.connect(&endpoint, &prefixes).await.unwrap();

        server.publisher.publish(frames(&["b.1", "x"]));
        server.publisher.publish(frames(&["a.1", "y"]));
        server.publisher.publish(frames(&["HUGZ"]));

        assert_eq!(client.subscriber.recv().await.unwrap(), frames(&["a.1", "y"]));
        assert_eq!(client.subscriber.recv().await.unwrap(), frames(&["HUGZ"]));
    }

    #[tokio::test]
    async fn push_reaches_collector() {
        let transport = InprocTransport::new();
        let endpoint = Endpoint::inproc("collect");
        let mut server = transport.bind(&endpoint).await.unwrap();
        let client = transport.connect(&endpoint, &all()).await.unwrap();

        client.updates.send(frames(&["k", "v"])).await.unwrap();
        assert_eq!(server.collector.recv().await.unwrap(), frames(&["k", "v"]));
    }

    #[tokio::test]
    async fn sever_closes_clients_but_keeps_server() {
        let transport = InprocTransport::new();
        let endpoint = Endpoint::inproc("sever");
        let server = transport.bind(&endpoint).await.unwrap();
        let mut client = transport.connect(&endpoint, &all()).await.unwrap();

        assert_eq!(transport.sever(&endpoint), 1);
        assert!(matches!(
            client.subscriber.recv().await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            client.updates.send(vec![]).await,
            Err(TransportError::Closed)
        ));

        // The server is still bound and accepts new clients.
        assert!(transport.is_bound(&endpoint));
        let mut fresh = transport.connect(&endpoint, &all()).await.unwrap();
        server.publisher.publish(frames(&["k"]));
        assert_eq!(fresh.subscriber.recv().await.unwrap(), frames(&["k"]));
    }

    #[tokio::test]
    async fn dropping_server_unbinds() {
        let transport = InprocTransport::new();
        let endpoint = Endpoint::inproc("drop");
        let server = transport.bind(&endpoint).await.unwrap();
        let mut client = transport.connect(&endpoint, &all()).await.unwrap();

        drop(server);
        assert!(!transport.is_bound(&endpoint));
        let result = tokio::time::timeout(Duration::from_secs(1), client.snapshot.recv()).await;
        assert!(matches!(result, Ok(Err(TransportError::Closed))));

        // The name can be reused.
        assert!(transport.bind(&endpoint).await.is_ok());
    }

    #[tokio::test]
    async fn sockets_outlive_transport_handle() {
        let endpoint = Endpoint::inproc("orphan");
        let mut server = InprocTransport::new().bind(&endpoint).await.unwrap();

        // Nothing is connected, so receiving must wait rather than close.
        let pending = tokio::time::timeout(Duration::from_millis(50), server.snapshot.recv()).await;
        assert!(pending.is_err());
        let pending = tokio::time::timeout(Duration::from_millis(50), server.collector.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn lagging_subscriber_is_closed() {
        let transport = InprocTransport::with_capacity(4);
        let endpoint = Endpoint::inproc("lag");
        let server = transport.bind(&endpoint).await.unwrap();
        let mut client = transport.connect(&endpoint, &all()).await.unwrap();

        for i in 0..20 {
            server.publisher.publish(vec![Bytes::from(format!("k{}", i))]);
        }
        assert!(matches!(
            client.subscriber.recv().await,
            Err(TransportError::Closed)
        ));
    }
}
