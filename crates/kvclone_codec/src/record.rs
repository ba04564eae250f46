//! Update records.

use crate::properties::{Properties, UUID_PROPERTY};
use bytes::Bytes;
use std::time::Duration;

/// Key reserved for heartbeat records on the publish channel.
pub const HEARTBEAT_KEY: &str = "HUGZ";

/// Key used by the sentinel record that terminates a snapshot.
pub const SENTINEL_KEY: &str = "";

/// The unit of replication.
///
/// An `UpdateRecord` carries the latest value of one key together with the
/// sequence number the server assigned when it published the update. A record
/// with an empty body is a deletion.
///
/// # Fields
///
/// - `key`: the replicated key; non-empty for data records
/// - `sequence`: server-assigned ordering number, zero before assignment
/// - `properties`: metadata such as `ttl` and `uuid`
/// - `body`: opaque value bytes; empty means delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    /// Record key.
    pub key: String,
    /// Server-assigned sequence number.
    pub sequence: u64,
    /// Record properties.
    pub properties: Properties,
    /// Record body.
    pub body: Bytes,
}

impl UpdateRecord {
    /// Creates a record with an unassigned sequence.
    pub fn new(key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            sequence: 0,
            properties: Properties::new(),
            body: body.into(),
        }
    }

    /// Creates a deletion record for `key`.
    pub fn delete(key: impl Into<String>) -> Self {
        Self::new(key, Bytes::new())
    }

    /// Creates the heartbeat record published by a server instance.
    pub fn heartbeat(server_id: impl Into<String>) -> Self {
        Self::delete(HEARTBEAT_KEY).with_property(UUID_PROPERTY, server_id)
    }

    /// Creates the sentinel that ends a snapshot at `sequence`.
    pub fn sentinel(sequence: u64, server_id: impl Into<String>) -> Self {
        Self::delete(SENTINEL_KEY)
            .with_sequence(sequence)
            .with_property(UUID_PROPERTY, server_id)
    }

    /// Sets the sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Adds or replaces a property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name, value);
        self
    }

    /// Sets the time-to-live property.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.properties.set_ttl(ttl);
        self
    }

    /// Returns true if this record deletes its key.
    pub fn is_delete(&self) -> bool {
        self.body.is_empty()
    }

    /// Returns true if this is a heartbeat.
    pub fn is_heartbeat(&self) -> bool {
        self.key == HEARTBEAT_KEY
    }

    /// Returns true if this is a snapshot sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.key == SENTINEL_KEY
    }

    /// Returns true if the key falls inside `subtree`.
    ///
    /// The empty subtree matches every key.
    pub fn in_subtree(&self, subtree: &str) -> bool {
        self.key.starts_with(subtree)
    }

    /// Returns the time-to-live, if the record carries a valid one.
    pub fn ttl(&self) -> Option<Duration> {
        self.properties.ttl()
    }
}

impl std::fmt::Display for UpdateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[seq:{}][key:{}]", self.sequence, self.key)?;
        for (name, value) in self.properties.iter() {
            write!(f, "[{}={}]", name, value)?;
        }
        match std::str::from_utf8(&self.body) {
            Ok(text) => write!(f, "{}", text),
            Err(_) => write!(f, "<{} bytes>", self.body.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::TTL_PROPERTY;

    #[test]
    fn delete_has_empty_body() {
        let record = UpdateRecord::delete("k");
        assert!(record.is_delete());
        assert!(!UpdateRecord::new("k", "v").is_delete());
    }

    #[test]
    fn reserved_records() {
        let hb = UpdateRecord::heartbeat("abc");
        assert!(hb.is_heartbeat());
        assert_eq!(hb.sequence, 0);
        assert_eq!(hb.properties.uuid(), Some("abc"));

        let sentinel = UpdateRecord::sentinel(42, "abc");
        assert!(sentinel.is_sentinel());
        assert_eq!(sentinel.sequence, 42);
        assert!(sentinel.body.is_empty());
    }

    #[test]
    fn subtree_matching() {
        let record = UpdateRecord::new("prod.db.host", "x");
        assert!(record.in_subtree(""));
        assert!(record.in_subtree("prod."));
        assert!(!record.in_subtree("dev."));
    }

    #[test]
    fn ttl_builder() {
        let record = UpdateRecord::new("k", "v").with_ttl(Duration::from_secs(2));
        assert_eq!(record.properties.get(TTL_PROPERTY), Some("2"));
        assert_eq!(record.ttl(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn display_format() {
        let record = UpdateRecord::new("k", "v")
            .with_sequence(7)
            .with_property("ttl", "3");
        assert_eq!(record.to_string(), "[seq:7][key:k][ttl=3]v");
    }
}
