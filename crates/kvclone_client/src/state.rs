//! Client state machine types.

use crate::config::RetryConfig;
use kvclone_transport::Endpoint;
use std::fmt;
use tokio::time::Instant;

/// The replication state of a clone client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No usable server connection; waiting to (re)connect.
    Disconnected,
    /// Connected and receiving a snapshot.
    SnapshotSync,
    /// Snapshot applied; following live updates.
    Subscribed,
}

impl SyncState {
    /// Returns true if the local store reflects a completed snapshot.
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncState::Subscribed)
    }

    /// Returns true if the client holds a server connection.
    pub fn is_connected(&self) -> bool {
        matches!(self, SyncState::SnapshotSync | SyncState::Subscribed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Disconnected => "disconnected",
            SyncState::SnapshotSync => "snapshot-sync",
            SyncState::Subscribed => "subscribed",
        };
        f.write_str(name)
    }
}

/// A point-in-time view of the client, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    /// Current state.
    pub state: SyncState,
    /// Endpoint of the current or most recent connection.
    pub endpoint: Option<Endpoint>,
    /// Highest sequence applied from the current server.
    pub cursor: u64,
    /// Instance id of the current server, once known.
    pub server_id: Option<String>,
    /// Number of times a connection was lost or abandoned.
    pub reconnects: u64,
    /// Number of keys in the local store.
    pub keys: usize,
    /// Writes queued while not subscribed.
    pub pending_writes: usize,
}

impl ClientStatus {
    pub(crate) fn initial() -> Self {
        Self {
            state: SyncState::Disconnected,
            endpoint: None,
            cursor: 0,
            server_id: None,
            reconnects: 0,
            keys: 0,
            pending_writes: 0,
        }
    }
}

/// Reconnect bookkeeping for one registered endpoint.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionState {
    pub(crate) endpoint: Endpoint,
    failures: u32,
    next_attempt: Instant,
}

impl ConnectionState {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            failures: 0,
            next_attempt: Instant::now(),
        }
    }

    /// When the next attempt on this endpoint may start.
    pub(crate) fn next_attempt(&self) -> Instant {
        self.next_attempt
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a failed or lost connection and schedules the next attempt.
    pub(crate) fn record_failure(&mut self, retry: &RetryConfig) {
        self.failures = self.failures.saturating_add(1);
        self.next_attempt = Instant::now() + retry.delay_for_attempt(self.failures);
    }

    /// Clears the backoff after a completed snapshot.
    pub(crate) fn record_success(&mut self) {
        self.failures = 0;
        self.next_attempt = Instant::now();
    }
}
