//! In-memory key-value store.

use kvclone_codec::{UpdateRecord, TTL_PROPERTY};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Instant;
use tracing::debug;

/// A stored record with its derived expiry deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// The latest record for the key.
    pub record: UpdateRecord,
    /// Absolute expiry deadline, derived from the `ttl` property at apply time.
    pub expires_at: Option<Instant>,
}

impl StoreEntry {
    /// Returns true if the entry's deadline has passed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// A mapping from key to the latest update record.
///
/// Applying a record with an empty body removes the key; anything else
/// inserts or overwrites. Keys iterate in byte order, so subtree scans are
/// range scans.
///
/// The store is a plain data structure. It is not synchronized: whoever owns
/// it (the server loop or the client agent) serializes access.
///
/// # Example
///
/// ```rust
/// use kvclone_codec::UpdateRecord;
/// use kvclone_core::Store;
///
/// let mut store = Store::new();
/// store.apply(UpdateRecord::new("a", "1").with_sequence(1));
/// assert_eq!(&store.get("a").unwrap().body[..], b"1");
///
/// store.apply(UpdateRecord::delete("a"));
/// assert!(store.get("a").is_none());
/// ```
#[derive(Debug, Default, Clone)]
pub struct Store {
    entries: BTreeMap<String, StoreEntry>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a record, stamping any TTL deadline from the current instant.
    pub fn apply(&mut self, record: UpdateRecord) {
        self.apply_at(record, Instant::now());
    }

    /// Applies a record, stamping any TTL deadline relative to `now`.
    ///
    /// Returns the previous entry for the key, if any.
    pub fn apply_at(&mut self, record: UpdateRecord, now: Instant) -> Option<StoreEntry> {
        if record.is_delete() {
            return self.entries.remove(&record.key);
        }
        let expires_at = record.ttl().and_then(|ttl| now.checked_add(ttl));
        if expires_at.is_none() {
            if let Some(raw) = record.properties.get(TTL_PROPERTY) {
                debug!(key = %record.key, ttl = raw, "ignoring unusable ttl, record never expires");
            }
        }
        let key = record.key.clone();
        self.entries.insert(key, StoreEntry { record, expires_at })
    }

    /// Returns the record stored under `key`.
    pub fn get(&self, key: &str) -> Option<&UpdateRecord> {
        self.entries.get(key).map(|entry| &entry.record)
    }

    /// Returns the full entry stored under `key`.
    pub fn entry(&self, key: &str) -> Option<&StoreEntry> {
        self.entries.get(key)
    }

    /// Iterates over every current record in key order.
    ///
    /// The iterator borrows the store, so it sees one consistent state. Each
    /// call starts over from the current contents.
    pub fn snapshot(&self) -> impl Iterator<Item = &UpdateRecord> + '_ {
        self.entries.values().map(|entry| &entry.record)
    }

    /// Iterates over the records whose key starts with `prefix`.
    pub fn snapshot_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a UpdateRecord> + 'a {
        self.entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(_, entry)| &entry.record)
    }

    /// Iterates over all entries, including deadlines.
    pub fn entries(&self) -> impl Iterator<Item = &StoreEntry> + '_ {
        self.entries.values()
    }

    /// Returns the highest sequence held by any record.
    pub fn max_sequence(&self) -> u64 {
        self.entries
            .values()
            .map(|entry| entry.record.sequence)
            .max()
            .unwrap_or(0)
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every key.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
