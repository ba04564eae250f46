//! Fuzz harnesses.
//!
//! Each harness feeds arbitrary input to a decoder and reports whether it
//! was accepted. A harness must never panic; proptest drives them below.

use bytes::Bytes;
use kvclone_codec::{decode_record, encode_record, SnapshotRequest};
use kvclone_core::Store;

/// Decodes `frames` as an update record.
///
/// Returns true if accepted. Accepted records with keys inside the limit
/// must re-encode to frames that decode to the same record.
pub fn fuzz_record_decode(frames: &[Bytes]) -> bool {
    let Ok(record) = decode_record(frames) else {
        return false;
    };
    if let Ok(encoded) = encode_record(&record) {
        let again = decode_record(&encoded).expect("re-encoded record must decode");
        assert_eq!(again, record);
    }
    true
}

/// Decodes `frames` as a snapshot request. Returns true if accepted.
pub fn fuzz_snapshot_request(frames: &[Bytes]) -> bool {
    SnapshotRequest::decode(frames).is_ok()
}

/// Decodes each message and applies the accepted ones to a fresh store.
///
/// Returns the number of keys left in the store.
pub fn fuzz_store_apply(messages: &[Vec<Bytes>]) -> usize {
    let mut store = Store::new();
    for frames in messages {
        if let Ok(record) = decode_record(frames) {
            if !record.is_sentinel() && !record.is_heartbeat() {
                store.apply(record);
            }
        }
    }
    store.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame() -> impl Strategy<Value = Bytes> {
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Bytes::from)
    }

    fn frames() -> impl Strategy<Value = Vec<Bytes>> {
        prop::collection::vec(frame(), 0..6)
    }

    proptest! {
        #[test]
        fn record_decode_never_panics(frames in frames()) {
            let _ = fuzz_record_decode(&frames);
        }

        #[test]
        fn snapshot_request_never_panics(frames in frames()) {
            let _ = fuzz_snapshot_request(&frames);
        }

        #[test]
        fn store_apply_never_panics(messages in prop::collection::vec(frames(), 0..16)) {
            let _ = fuzz_store_apply(&messages);
        }

        #[test]
        fn generated_records_are_accepted(record in crate::generators::record_strategy()) {
            let frames = encode_record(&record).unwrap();
            prop_assert!(fuzz_record_decode(&frames));
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(!fuzz_record_decode(&[]));
        assert!(!fuzz_snapshot_request(&[]));
        assert_eq!(fuzz_store_apply(&[]), 0);
    }
}
