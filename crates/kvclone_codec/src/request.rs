//! Snapshot request frames.

use crate::error::{CodecError, CodecResult};
use crate::frame::Frames;
use bytes::Bytes;

/// First frame of every snapshot request.
pub const SNAPSHOT_COMMAND: &str = "ICANHAZ?";

/// A request for the current state of a subtree.
///
/// Wire form is two frames: `["ICANHAZ?", subtree]`. An empty subtree asks
/// for every key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Key prefix to restrict the snapshot to.
    pub subtree: String,
}

impl SnapshotRequest {
    /// Creates a snapshot request for `subtree`.
    pub fn new(subtree: impl Into<String>) -> Self {
        Self {
            subtree: subtree.into(),
        }
    }

    /// Encodes to frames.
    pub fn encode(&self) -> Frames {
        vec![
            Bytes::from_static(SNAPSHOT_COMMAND.as_bytes()),
            Bytes::copy_from_slice(self.subtree.as_bytes()),
        ]
    }

    /// Decodes from frames.
    pub fn decode(frames: &[Bytes]) -> CodecResult<Self> {
        let [command, subtree] = frames else {
            return Err(CodecError::malformed(format!(
                "snapshot request has {} frames, expected 2",
                frames.len()
            )));
        };
        if &command[..] != SNAPSHOT_COMMAND.as_bytes() {
            return Err(CodecError::malformed("unknown snapshot command"));
        }
        let subtree = std::str::from_utf8(subtree)
            .map_err(|_| CodecError::malformed("subtree is not valid UTF-8"))?;
        Ok(Self::new(subtree))
    }
}
