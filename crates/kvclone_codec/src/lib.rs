//! # kvclone Codec
//!
//! Wire codec for kvclone update records.
//!
//! This crate provides:
//! - `UpdateRecord`, the unit of replication
//! - `Properties`, the ordered metadata set carried on records
//! - Multi-part frame encoding/decoding (`encode_record`, `decode_record`)
//! - Snapshot request frames
//!
//! This is a pure crate with no I/O operations.
//!
//! ## Usage
//!
//! ```
//! use kvclone_codec::{decode_record, encode_record, UpdateRecord};
//!
//! let record = UpdateRecord::new("config.port", "8080").with_sequence(3);
//! let frames = encode_record(&record).unwrap();
//! assert_eq!(decode_record(&frames).unwrap(), record);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod properties;
mod record;
mod request;

pub use error::{CodecError, CodecResult};
pub use frame::{decode_record, encode_record, Frames, RecordCodec, MAX_KEY_LEN};
pub use properties::{Properties, TTL_PROPERTY, UUID_PROPERTY};
pub use record::{UpdateRecord, HEARTBEAT_KEY, SENTINEL_KEY};
pub use request::{SnapshotRequest, SNAPSHOT_COMMAND};
