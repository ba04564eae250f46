//! # kvclone Core
//!
//! The data structures shared by the kvclone server and client.
//!
//! This crate provides:
//! - `Store`, a key-ordered map from key to latest update record
//! - `TtlExpirer`, the periodic scan that retires records past their TTL
//!
//! ## Key Invariants
//!
//! - An empty body deletes; no tombstones are kept
//! - TTL deadlines are absolute instants derived when a record is applied
//! - The store is owned by exactly one task; nothing here locks

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod store;
mod ttl;

pub use store::{Store, StoreEntry};
pub use ttl::{TtlExpirer, DEFAULT_SCAN_INTERVAL};
