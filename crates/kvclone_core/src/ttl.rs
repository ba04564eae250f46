//! Time-to-live expiry.

use crate::store::Store;
use kvclone_codec::UpdateRecord;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default interval between expiry scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Finds expired records and produces the deletions that retire them.
///
/// Deadlines live on the store entries and are re-read at every scan, so a
/// record refreshed before its deadline is no longer expired.
///
/// The expirer does not touch the store or assign sequence numbers. Its
/// deletions go through the server's publish path like any other update.
#[derive(Debug, Clone)]
pub struct TtlExpirer {
    interval: Duration,
    expired_total: u64,
}

impl TtlExpirer {
    /// Creates an expirer that scans every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            expired_total: 0,
        }
    }

    /// Returns the scan interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns how many deletions this expirer has produced.
    pub fn expired_total(&self) -> u64 {
        self.expired_total
    }

    /// Scans `store` and returns one deletion record per expired key.
    ///
    /// The returned records have an unassigned sequence.
    pub fn scan(&mut self, store: &Store, now: Instant) -> Vec<UpdateRecord> {
        let expired: Vec<UpdateRecord> = store
            .entries()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| {
                debug!(key = %entry.record.key, "record expired");
                UpdateRecord::delete(entry.record.key.clone())
            })
            .collect();
        self.expired_total += expired.len() as u64;
        expired
    }
}

impl Default for TtlExpirer {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_INTERVAL)
    }
}
