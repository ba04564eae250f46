//! # kvclone Server
//!
//! The state server of a kvclone deployment.
//!
//! This crate provides:
//! - Snapshot service: the current state of a subtree, ended by a sentinel
//! - Update publishing with server-assigned sequence numbers
//! - Collection of updates pushed by clients
//! - TTL expiry and periodic heartbeats
//! - `ServerHandle` for driving the server from the embedding process
//!
//! # Architecture
//!
//! One task owns the store and the sockets and multiplexes every duty with
//! `tokio::select!`. A duty handles one message to completion before the
//! next is looked at, so store mutation and sequence assignment never race.
//!
//! # Protocol
//!
//! 1. A client subscribes to the publish channel, then asks for a snapshot
//! 2. The server replies with every matching record and a sentinel whose
//!    sequence is the current maximum
//! 3. The client applies live updates with a higher sequence than the sentinel
//! 4. Clients push writes to the collector; the server sequences and publishes
//!    them like any other update

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;

pub use config::{ServerConfig, DEFAULT_HEARTBEAT_INTERVAL};
pub use error::{ServerError, ServerResult};
pub use handler::{ServerStats, StateHandler};
pub use server::{CloneServer, RunningServer, ServerHandle};
