//! Duty handlers.
//!
//! `StateHandler` holds everything the server loop mutates: the store, the
//! sequence counter, and the TTL expirer. Its methods take decoded or raw
//! frames and return the frames to send, so the loop only moves bytes.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use bytes::Bytes;
use kvclone_codec::{Frames, RecordCodec, SnapshotRequest, UpdateRecord, HEARTBEAT_KEY};
use kvclone_core::{Store, TtlExpirer};
use std::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Counters reported by a running server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Last assigned sequence number.
    pub sequence: u64,
    /// Number of keys in the store.
    pub keys: usize,
    /// Snapshot requests answered.
    pub snapshots_served: u64,
    /// Updates accepted from clients.
    pub updates_collected: u64,
    /// Records retired by TTL expiry.
    pub records_expired: u64,
    /// Inbound messages dropped as malformed or invalid.
    pub malformed_dropped: u64,
    /// Heartbeats published.
    pub heartbeats_sent: u64,
}

/// Handler for the server's duties.
pub struct StateHandler {
    store: Store,
    sequence: u64,
    expirer: TtlExpirer,
    codec: RecordCodec,
    server_id: String,
    stats: ServerStats,
}

impl StateHandler {
    /// Creates a handler with a fresh instance id.
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_server_id(config, Uuid::new_v4().to_string())
    }

    /// Creates a handler with a fixed instance id.
    pub fn with_server_id(config: &ServerConfig, server_id: impl Into<String>) -> Self {
        Self {
            store: Store::new(),
            sequence: 0,
            expirer: TtlExpirer::new(config.ttl_scan_interval),
            codec: RecordCodec::new(config.max_key_len),
            server_id: server_id.into(),
            stats: ServerStats::default(),
        }
    }

    /// Returns the instance id sent with heartbeats and sentinels.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Returns the last assigned sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Answers a snapshot request.
    ///
    /// Returns one frame set per record under the requested subtree, in key
    /// order, followed by the sentinel carrying the current sequence.
    pub fn handle_snapshot_request(&mut self, frames: &[Bytes]) -> ServerResult<Vec<Frames>> {
        let request = SnapshotRequest::decode(frames)?;
        let mut replies = Vec::new();
        for record in self.store.snapshot_prefix(&request.subtree) {
            replies.push(self.codec.encode(record)?);
        }
        let sentinel = UpdateRecord::sentinel(self.sequence, self.server_id.clone());
        replies.push(self.codec.encode(&sentinel)?);

        self.stats.snapshots_served += 1;
        debug!(
            subtree = %request.subtree,
            records = replies.len() - 1,
            sequence = self.sequence,
            "snapshot served"
        );
        Ok(replies)
    }

    /// Accepts an update pushed by a client.
    ///
    /// The client's sequence is ignored. Returns the frames to publish.
    pub fn handle_collected(&mut self, frames: &[Bytes]) -> ServerResult<Frames> {
        let record = self.codec.decode(frames)?;
        let published = self.publish(record)?;
        self.stats.updates_collected += 1;
        Ok(published)
    }

    /// Assigns the next sequence to `record`, applies it, and returns the
    /// frames to publish.
    pub fn publish(&mut self, record: UpdateRecord) -> ServerResult<Frames> {
        self.publish_at(record, Instant::now())
    }

    fn publish_at(&mut self, mut record: UpdateRecord, now: Instant) -> ServerResult<Frames> {
        if record.is_sentinel() || record.key == HEARTBEAT_KEY {
            return Err(ServerError::InvalidRequest(format!(
                "reserved key {:?}",
                record.key
            )));
        }
        self.codec.check_key(&record.key)?;

        self.sequence += 1;
        record.sequence = self.sequence;
        let frames = self.codec.encode(&record)?;
        trace!(%record, "publishing");
        self.store.apply_at(record, now);
        Ok(frames)
    }

    /// Runs the TTL expirer and publishes a deletion for every expired key.
    pub fn flush_ttl(&mut self, now: Instant) -> Vec<Frames> {
        let expired = self.expirer.scan(&self.store, now);
        let mut published = Vec::with_capacity(expired.len());
        for record in expired {
            match self.publish_at(record, now) {
                Ok(frames) => published.push(frames),
                Err(e) => warn!(error = %e, "could not publish expiry"),
            }
        }
        self.stats.records_expired = self.expirer.expired_total();
        published
    }

    /// Returns the frames of a heartbeat.
    pub fn heartbeat(&mut self) -> ServerResult<Frames> {
        let frames = self.codec.encode(&UpdateRecord::heartbeat(self.server_id.clone()))?;
        self.stats.heartbeats_sent += 1;
        Ok(frames)
    }

    /// Records an inbound message that was dropped.
    pub fn note_dropped(&mut self) {
        self.stats.malformed_dropped += 1;
    }

    /// Returns the current counters.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            sequence: self.sequence,
            keys: self.store.len(),
            ..self.stats.clone()
        }
    }
}
