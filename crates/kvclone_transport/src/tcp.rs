//! TCP fabric.
//!
//! A server at `tcp://host:P` listens on three ports:
//!
//! - `P` for snapshot requests (router)
//! - `P + 1` for live updates (publisher)
//! - `P + 2` for pushed updates (collector)
//!
//! Each stream carries frame sets encoded as:
//!
//! ```text
//! +-------------+--------------+---------+--------------+---------+-----
//! | count (u32) | len_0 (u32)  | frame_0 | len_1 (u32)  | frame_1 | ...
//! +-------------+--------------+---------+--------------+---------+-----
//! ```
//!
//! All integers are big-endian. A subscriber opens its stream by sending its
//! prefixes as one frame set; the publisher answers with an empty frame set
//! once the subscription is live.

use crate::endpoint::Endpoint;
use crate::error::{TransportError, TransportResult};
use crate::socket::{
    topic_matches, ClientSockets, DealerSocket, Link, PeerId, PeerTable, PubSocket, PullSocket,
    PushSocket, Resources, RouterSocket, ServerSockets, SubSocket, SubSource, TaskGuard,
};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use kvclone_codec::Frames;
use std::future::Future;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// Maximum number of frames in one frame set.
pub const MAX_FRAMES: usize = 64;

/// Maximum total payload of one frame set (16 MiB).
pub const MAX_FRAME_SET_BYTES: usize = 16 * 1024 * 1024;

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default channel capacity behind each TCP socket.
pub const DEFAULT_TCP_CAPACITY: usize = 1024;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Writes one frame set.
pub async fn write_frames<W>(writer: &mut W, frames: &[Bytes]) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    if frames.len() > MAX_FRAMES {
        return Err(TransportError::FrameTooLarge {
            size: frames.len(),
            max: MAX_FRAMES,
        });
    }
    let payload: usize = frames.iter().map(Bytes::len).sum();
    if payload > MAX_FRAME_SET_BYTES {
        return Err(TransportError::FrameTooLarge {
            size: payload,
            max: MAX_FRAME_SET_BYTES,
        });
    }

    let mut buf = BytesMut::with_capacity(4 + 4 * frames.len() + payload);
    buf.put_u32(frames.len() as u32);
    for frame in frames {
        buf.put_u32(frame.len() as u32);
        buf.put_slice(frame);
    }
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame set. Returns `None` on a clean end of stream.
pub async fn read_frames<R>(reader: &mut R) -> TransportResult<Option<Frames>>
where
    R: AsyncRead + Unpin,
{
    let count = match reader.read_u32().await {
        Ok(count) => count as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if count > MAX_FRAMES {
        return Err(TransportError::FrameTooLarge {
            size: count,
            max: MAX_FRAMES,
        });
    }

    let mut frames = Vec::with_capacity(count);
    let mut total = 0usize;
    for _ in 0..count {
        let len = reader.read_u32().await? as usize;
        total = total.saturating_add(len);
        if total > MAX_FRAME_SET_BYTES {
            return Err(TransportError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_SET_BYTES,
            });
        }
        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;
        frames.push(Bytes::from(frame));
    }
    Ok(Some(frames))
}

/// A transport over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    capacity: usize,
}

impl TcpTransport {
    /// Creates a TCP transport with default settings.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            capacity: DEFAULT_TCP_CAPACITY,
        }
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the channel capacity behind each socket.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Returns the host and the snapshot, publish and collector ports.
    fn parts(endpoint: &Endpoint) -> TransportResult<(&str, [u16; 3])> {
        let Endpoint::Tcp { host, port } = endpoint else {
            return Err(TransportError::InvalidEndpoint(format!(
                "{} is not a tcp endpoint",
                endpoint
            )));
        };
        let out_of_range = || {
            TransportError::InvalidEndpoint(format!(
                "{} needs ports {} to {}",
                endpoint,
                port,
                u32::from(*port) + 2
            ))
        };
        let publish = port.checked_add(1).ok_or_else(out_of_range)?;
        let collect = port.checked_add(2).ok_or_else(out_of_range)?;
        Ok((host.as_str(), [*port, publish, collect]))
    }

    async fn listen(endpoint: &Endpoint, host: &str, port: u16) -> TransportResult<TcpListener> {
        let host = if host == "*" { "0.0.0.0" } else { host };
        TcpListener::bind((host, port)).await.map_err(|e| {
            if e.kind() == ErrorKind::AddrInUse {
                TransportError::AddressInUse(endpoint.to_string())
            } else {
                TransportError::Io(e)
            }
        })
    }

    async fn dial(&self, endpoint: &Endpoint, host: &str, port: u16) -> TransportResult<TcpStream> {
        let host = if host == "*" { "127.0.0.1" } else { host };
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| {
                if e.kind() == ErrorKind::ConnectionRefused {
                    TransportError::ConnectionRefused(endpoint.to_string())
                } else {
                    TransportError::Io(e)
                }
            })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn bind(&self, endpoint: &Endpoint) -> TransportResult<ServerSockets> {
        let (host, [snapshot_port, publish_port, collect_port]) = Self::parts(endpoint)?;
        let snapshot_listener = Self::listen(endpoint, host, snapshot_port).await?;
        let publish_listener = Self::listen(endpoint, host, publish_port).await?;
        let collect_listener = Self::listen(endpoint, host, collect_port).await?;

        let capacity = self.capacity;
        let (requests, incoming) = mpsc::channel(capacity);
        let (publisher, _) = broadcast::channel(capacity);
        let (collector, receiver) = mpsc::channel(capacity);
        let peers = PeerTable::default();

        let mut resources = Resources::default();

        let next_peer = Arc::new(AtomicU64::new(1));
        let router_peers = peers.clone();
        resources.push(TaskGuard::spawn(accept_loop(
            snapshot_listener,
            "snapshot",
            move |stream| {
                let peer = PeerId::new(next_peer.fetch_add(1, Ordering::Relaxed));
                serve_router_peer(stream, peer, requests.clone(), router_peers.clone(), capacity)
            },
        )));

        let fanout = publisher.clone();
        resources.push(TaskGuard::spawn(accept_loop(
            publish_listener,
            "publish",
            move |stream| serve_subscriber(stream, fanout.clone()),
        )));

        resources.push(TaskGuard::spawn(accept_loop(
            collect_listener,
            "collect",
            move |stream| serve_pusher(stream, collector.clone()),
        )));

        debug!(%endpoint, "tcp endpoint bound");
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
        let (host, [snapshot_port, publish_port, collect_port]) = Self::parts(endpoint)?;
        let capacity = self.capacity;

        let snapshot_stream = self.dial(endpoint, host, snapshot_port).await?;
        let publish_stream = self.dial(endpoint, host, publish_port).await?;
        let collect_stream = self.dial(endpoint, host, collect_port).await?;

        let (severed_tx, severed_rx) = watch::channel(false);
        let severed = Arc::new(severed_tx);
        let link = Link::watch(severed_rx);
        let mut resources = Resources::default();

        // Snapshot dealer: requests out on one task, replies in on another.
        let (snapshot_read, mut snapshot_write) = snapshot_stream.into_split();
        let (requests, mut request_rx) = mpsc::channel::<(PeerId, Frames)>(capacity);
        let (reply_tx, replies) = mpsc::channel(capacity);
        let cut = severed.clone();
        resources.push(TaskGuard::spawn(async move {
            while let Some((_, frames)) = request_rx.recv().await {
                if let Err(e) = write_frames(&mut snapshot_write, &frames).await {
                    debug!(error = %e, "snapshot request write failed");
                    break;
                }
            }
            cut.send_replace(true);
        }));
        let cut = severed.clone();
        resources.push(TaskGuard::spawn(async move {
            forward(BufReader::new(snapshot_read), reply_tx, "snapshot").await;
            cut.send_replace(true);
        }));

        // Subscriber: send prefixes, wait until the publisher confirms.
        let (publish_read, mut publish_write) = publish_stream.into_split();
        let mut publish_read = BufReader::new(publish_read);
        let topics: Frames = prefixes
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        write_frames(&mut publish_write, &topics).await?;
        match tokio::time::timeout(self.connect_timeout, read_frames(&mut publish_read)).await {
            Err(_) => return Err(TransportError::Timeout),
            Ok(Ok(Some(ack))) if ack.is_empty() => {}
            Ok(Ok(_)) => return Err(TransportError::Closed),
            Ok(Err(e)) => return Err(e),
        }
        let (stream_tx, stream_rx) = mpsc::channel(capacity);
        let cut = severed.clone();
        resources.push(TaskGuard::spawn(async move {
            // Keep the write half open; the publisher treats EOF as a disconnect.
            let _publish_write = publish_write;
            forward(publish_read, stream_tx, "publish").await;
            cut.send_replace(true);
        }));

        // Pusher: the collector never writes back, so any read means EOF.
        let (mut collect_read, mut collect_write) = collect_stream.into_split();
        let (updates, mut update_rx) = mpsc::channel::<Frames>(capacity);
        let cut = severed;
        resources.push(TaskGuard::spawn(async move {
            let mut eof = [0u8; 1];
            loop {
                tokio::select! {
                    frames = update_rx.recv() => match frames {
                        Some(frames) => {
                            if let Err(e) = write_frames(&mut collect_write, &frames).await {
                                debug!(error = %e, "update push failed");
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = collect_read.read(&mut eof) => break,
                }
            }
            cut.send_replace(true);
        }));

        debug!(%endpoint, "tcp client connected");
        Ok(ClientSockets {
            snapshot: DealerSocket {
                peer: PeerId::new(0),
                requests,
                replies,
                link: link.clone(),
            },
            subscriber: SubSocket {
                source: SubSource::Stream(stream_rx),
                prefixes: topics,
                link: link.clone(),
            },
            updates: PushSocket {
                sender: updates,
                link,
            },
            resources,
        })
    }
}

/// Reads frame sets from `reader` into `sink` until either side closes.
async fn forward<R>(mut reader: R, sink: mpsc::Sender<Frames>, role: &'static str)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frames(&mut reader).await {
            Ok(Some(frames)) => {
                if sink.send(frames).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!(role, "connection closed by peer");
                return;
            }
            Err(e) => {
                debug!(role, error = %e, "connection read failed");
                return;
            }
        }
    }
}

/// Accepts connections until aborted. Dropping the loop drops every
/// connection task with it.
async fn accept_loop<F, Fut>(listener: TcpListener, role: &'static str, mut serve: F)
where
    F: FnMut(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = TransportResult<()>> + Send + 'static,
{
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    trace!(role, %addr, "connection accepted");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(role, error = %e, "set_nodelay failed");
                    }
                    let connection = serve(stream);
                    connections.spawn(async move {
                        if let Err(e) = connection.await {
                            debug!(role, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(role, error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_router_peer(
    stream: TcpStream,
    peer: PeerId,
    requests: mpsc::Sender<(PeerId, Frames)>,
    peers: PeerTable,
    capacity: usize,
) -> TransportResult<()> {
    let (reader, mut writer) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Frames>(capacity);
    peers.register(peer, reply_tx);

    let _writer = TaskGuard::spawn(async move {
        while let Some(frames) = reply_rx.recv().await {
            if let Err(e) = write_frames(&mut writer, &frames).await {
                debug!(%peer, error = %e, "snapshot reply write failed");
                break;
            }
        }
    });

    let mut reader = BufReader::new(reader);
    let result = async {
        while let Some(frames) = read_frames(&mut reader).await? {
            if requests.send((peer, frames)).await.is_err() {
                break;
            }
        }
        Ok::<(), TransportError>(())
    }
    .await;
    peers.remove(peer);
    result
}

async fn serve_subscriber(
    stream: TcpStream,
    fanout: broadcast::Sender<Frames>,
) -> TransportResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let Some(prefixes) = read_frames(&mut reader).await? else {
        return Ok(());
    };

    let mut subscription = fanout.subscribe();
    write_frames(&mut writer, &[]).await?;

    let mut eof = [0u8; 1];
    loop {
        tokio::select! {
            message = subscription.recv() => match message {
                Ok(frames) => {
                    if topic_matches(&prefixes, &frames) {
                        write_frames(&mut writer, &frames).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // A gap cannot be repaired in-stream; the client resyncs.
                    warn!(skipped, "tcp subscriber fell behind, closing");
                    return Err(TransportError::Closed);
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            // Subscribers send nothing after their prefixes; a read means EOF.
            _ = reader.read(&mut eof) => return Ok(()),
        }
    }
}

async fn serve_pusher(stream: TcpStream, collector: mpsc::Sender<Frames>) -> TransportResult<()> {
    let mut reader = BufReader::new(stream);
    while let Some(frames) = read_frames(&mut reader).await? {
        if collector.send(frames).await.is_err() {
            break;
        }
    }
    Ok(())
}
