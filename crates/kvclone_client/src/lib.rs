//! # kvclone Client
//!
//! Clone client for kvclone: a local replica of a server's key-value state.
//!
//! This crate provides:
//! - `CloneClient`, the handle applications read and write through
//! - The replication state machine (`Disconnected`, `SnapshotSync`,
//!   `Subscribed`)
//! - Heartbeat-based liveness, reconnect with backoff, and failover across
//!   several server endpoints
//! - Subtree filtering so a client holds only the keys under one prefix
//!
//! # Sync Protocol
//!
//! 1. Subscribe to the server's publish channel (subtree + heartbeats)
//! 2. Request a snapshot of the subtree
//! 3. Load snapshot records into a staging store until the sentinel arrives
//! 4. Swap the staging store in; remember the sentinel's sequence as cursor
//! 5. Apply live updates whose sequence is above the cursor
//!
//! If the server goes quiet for `heartbeat_interval * liveness_factor`, the
//! client drops the connection, moves to the next endpoint, and starts over
//! at step 1 once that endpoint's backoff has elapsed.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod agent;
mod client;
mod config;
mod error;
mod state;

pub use client::CloneClient;
pub use config::{ClientConfig, RetryConfig, WriteMode};
pub use error::{ClientError, ClientResult};
pub use state::{ClientStatus, SyncState};
