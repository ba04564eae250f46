//! # kvclone Transport
//!
//! Message sockets for the kvclone server and client.
//!
//! This crate provides:
//! - `Transport`, the seam between the replication logic and the network
//! - Three socket pairs: router/dealer, publish/subscribe, push/pull
//! - `InprocTransport` for servers and clients in one process
//! - `TcpTransport` for servers and clients on a network
//!
//! A message is a frame set (`Vec<Bytes>`). Frame sets are delivered whole
//! and in order per connection.
//!
//! ## Usage
//!
//! ```rust
//! use bytes::Bytes;
//! use kvclone_transport::{Endpoint, InprocTransport, Transport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = InprocTransport::new();
//! let endpoint = Endpoint::parse("inproc://state").unwrap();
//!
//! let server = transport.bind(&endpoint).await.unwrap();
//! let mut client = transport
//!     .connect(&endpoint, &["config.".to_string()])
//!     .await
//!     .unwrap();
//!
//! server.publisher.publish(vec![Bytes::from_static(b"config.port")]);
//! let frames = client.subscriber.recv().await.unwrap();
//! assert_eq!(frames[0], Bytes::from_static(b"config.port"));
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod endpoint;
mod error;
mod inproc;
mod socket;
mod tcp;
mod transport;

pub use endpoint::Endpoint;
pub use error::{TransportError, TransportResult};
pub use inproc::{InprocTransport, DEFAULT_INPROC_CAPACITY};
pub use socket::{
    topic_matches, ClientSockets, DealerSocket, PeerId, PubSocket, PullSocket, PushSocket,
    Replier, RouterSocket, ServerSockets, SubSocket,
};
pub use tcp::{
    read_frames, write_frames, TcpTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TCP_CAPACITY,
    MAX_FRAMES, MAX_FRAME_SET_BYTES,
};
pub use transport::Transport;
