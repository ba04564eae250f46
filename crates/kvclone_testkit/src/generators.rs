//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use bytes::Bytes;
use kvclone_codec::{Properties, UpdateRecord, HEARTBEAT_KEY};
use proptest::prelude::*;

/// Strategy for generating valid data keys.
///
/// Keys are dotted paths such as `prod.db.host`, never empty and never the
/// heartbeat key.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}(\\.[a-z0-9]{1,8}){0,3}")
        .expect("Invalid regex")
        .prop_filter("reserved key", |k| k != HEARTBEAT_KEY)
}

/// Strategy for generating keys under `subtree`.
pub fn key_in_subtree(subtree: &'static str) -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,8}")
        .expect("Invalid regex")
        .prop_map(move |suffix| format!("{}{}", subtree, suffix))
}

/// Strategy for generating record bodies; empty bodies are deletions.
pub fn body_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..256).prop_map(Bytes::from)
}

/// Strategy for generating non-empty record bodies.
pub fn value_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 1..256).prop_map(Bytes::from)
}

/// Strategy for generating property sets with unique names.
pub fn properties_strategy() -> impl Strategy<Value = Properties> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        prop::string::string_regex("[ -~]{0,16}").expect("Invalid regex"),
        0..4,
    )
    .prop_map(|map| map.into_iter().collect())
}

/// Strategy for generating encodable update records.
pub fn record_strategy() -> impl Strategy<Value = UpdateRecord> {
    (
        key_strategy(),
        any::<u64>(),
        properties_strategy(),
        body_strategy(),
    )
        .prop_map(|(key, sequence, properties, body)| UpdateRecord {
            key,
            sequence,
            properties,
            body,
        })
}

/// A write a client might issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set a key.
    Set(String, Bytes),
    /// Delete a key.
    Delete(String),
}

/// Strategy for generating a sequence of writes over a small key space, so
/// that overwrites and deletes of existing keys are common.
pub fn write_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    let key = prop::sample::select(vec!["a.1", "a.2", "a.3", "b.1", "b.2"]);
    let op = prop_oneof![
        3 => (key.clone(), value_strategy()).prop_map(|(k, v)| WriteOp::Set(k.to_string(), v)),
        1 => key.prop_map(|k| WriteOp::Delete(k.to_string())),
    ];
    prop::collection::vec(op, 1..max_ops.max(2))
}
