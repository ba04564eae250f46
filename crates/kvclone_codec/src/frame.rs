//! Multi-part frame encoding for update records.
//!
//! ## Layout
//!
//! ```text
//! frame 0  key (UTF-8)
//! frame 1  sequence (u64, big-endian, exactly 8 bytes)
//! frame 2  properties block      (only when the record has properties)
//! frame 3  body
//! ```
//!
//! Without properties the body is frame 2 and the set has three frames.
//! Each property entry is `u32 BE len | key | u32 BE len | value`.

use crate::error::{CodecError, CodecResult};
use crate::properties::Properties;
use crate::record::UpdateRecord;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// An ordered set of transport frames making up one message.
pub type Frames = Vec<Bytes>;

/// Default maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 255;

const SEQUENCE_WIDTH: usize = 8;

/// Encode a record with the default key limit.
pub fn encode_record(record: &UpdateRecord) -> CodecResult<Frames> {
    RecordCodec::default().encode(record)
}

/// Decode a record from a frame set.
pub fn decode_record(frames: &[Bytes]) -> CodecResult<UpdateRecord> {
    RecordCodec::default().decode(frames)
}

/// Record codec with a configurable key limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCodec {
    max_key_len: usize,
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self {
            max_key_len: MAX_KEY_LEN,
        }
    }
}

impl RecordCodec {
    /// Creates a codec with the given key limit.
    pub fn new(max_key_len: usize) -> Self {
        Self { max_key_len }
    }

    /// Returns the key limit.
    pub fn max_key_len(&self) -> usize {
        self.max_key_len
    }

    /// Checks a key against the limit.
    pub fn check_key(&self, key: &str) -> CodecResult<()> {
        if key.len() > self.max_key_len {
            return Err(CodecError::KeyTooLong {
                len: key.len(),
                max: self.max_key_len,
            });
        }
        Ok(())
    }

    /// Encodes a record into frames.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::KeyTooLong`] if the key exceeds the limit.
    pub fn encode(&self, record: &UpdateRecord) -> CodecResult<Frames> {
        self.check_key(&record.key)?;

        let mut frames = Vec::with_capacity(4);
        frames.push(Bytes::copy_from_slice(record.key.as_bytes()));
        frames.push(Bytes::copy_from_slice(&record.sequence.to_be_bytes()));
        if !record.properties.is_empty() {
            frames.push(encode_properties(&record.properties)?);
        }
        frames.push(record.body.clone());
        Ok(frames)
    }

    /// Decodes a record from frames.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedMessage`] if the frame count, sequence
    /// width, properties block, or text encoding is invalid.
    pub fn decode(&self, frames: &[Bytes]) -> CodecResult<UpdateRecord> {
        let (properties, body) = match frames.len() {
            3 => (Properties::new(), frames[2].clone()),
            4 => (decode_properties(&frames[2])?, frames[3].clone()),
            n => {
                return Err(CodecError::malformed(format!(
                    "expected 3 or 4 frames, got {}",
                    n
                )))
            }
        };

        let key = std::str::from_utf8(&frames[0])
            .map_err(|_| CodecError::malformed("key is not valid UTF-8"))?
            .to_string();

        let seq_frame = &frames[1];
        if seq_frame.len() != SEQUENCE_WIDTH {
            return Err(CodecError::malformed(format!(
                "sequence frame is {} bytes, expected {}",
                seq_frame.len(),
                SEQUENCE_WIDTH
            )));
        }
        let sequence = seq_frame.clone().get_u64();

        Ok(UpdateRecord {
            key,
            sequence,
            properties,
            body,
        })
    }
}

fn encode_properties(properties: &Properties) -> CodecResult<Bytes> {
    let size: usize = properties
        .iter()
        .map(|(k, v)| 8 + k.len() + v.len())
        .sum();
    let mut buf = BytesMut::with_capacity(size);
    for (name, value) in properties.iter() {
        put_text(&mut buf, name)?;
        put_text(&mut buf, value)?;
    }
    Ok(buf.freeze())
}

fn put_text(buf: &mut BytesMut, text: &str) -> CodecResult<()> {
    let len = u32::try_from(text.len())
        .map_err(|_| CodecError::malformed("property text exceeds u32 length"))?;
    buf.put_u32(len);
    buf.put_slice(text.as_bytes());
    Ok(())
}

fn decode_properties(block: &Bytes) -> CodecResult<Properties> {
    let mut buf = block.clone();
    let mut properties = Properties::new();
    while buf.has_remaining() {
        let name = take_text(&mut buf)?;
        let value = take_text(&mut buf)?;
        properties.insert(name, value);
    }
    Ok(properties)
}

fn take_text(buf: &mut Bytes) -> CodecResult<String> {
    if buf.remaining() < 4 {
        return Err(CodecError::malformed("truncated property length"));
    }
    let len = buf.get_u32() as usize;
    if len > buf.remaining() {
        return Err(CodecError::malformed(format!(
            "property length {} exceeds remaining {} bytes",
            len,
            buf.remaining()
        )));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| CodecError::malformed("property is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frames(parts: &[&[u8]]) -> Frames {
        parts.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }

    #[test]
    fn three_frames_without_properties() {
        let record = UpdateRecord::new("key", "body").with_sequence(9);
        let encoded = encode_record(&record).unwrap();

        assert_eq!(encoded.len(), 3);
        assert_eq!(&encoded[0][..], b"key");
        assert_eq!(&encoded[1][..], &9u64.to_be_bytes());
        assert_eq!(&encoded[2][..], b"body");
        assert_eq!(decode_record(&encoded).unwrap(), record);
    }

    #[test]
    fn four_frames_with_properties() {
        let record = UpdateRecord::new("key", "body")
            .with_sequence(1)
            .with_ttl(Duration::from_secs(10))
            .with_property("x-origin", "edge-3");
        let encoded = encode_record(&record).unwrap();

        assert_eq!(encoded.len(), 4);
        let decoded = decode_record(&encoded).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.properties.get("x-origin"), Some("edge-3"));
    }

    #[test]
    fn properties_block_layout() {
        let record = UpdateRecord::new("k", "").with_property("ab", "c");
        let encoded = encode_record(&record).unwrap();
        assert_eq!(
            &encoded[2][..],
            &[0, 0, 0, 2, b'a', b'b', 0, 0, 0, 1, b'c'][..]
        );
    }

    #[test]
    fn key_too_long_on_encode() {
        let record = UpdateRecord::new("k".repeat(MAX_KEY_LEN + 1), "v");
        let err = encode_record(&record).unwrap_err();
        assert_eq!(
            err,
            CodecError::KeyTooLong {
                len: MAX_KEY_LEN + 1,
                max: MAX_KEY_LEN
            }
        );

        let record = UpdateRecord::new("k".repeat(MAX_KEY_LEN), "v");
        assert!(encode_record(&record).is_ok());
    }

    #[test]
    fn custom_key_limit() {
        let codec = RecordCodec::new(4);
        assert!(codec.encode(&UpdateRecord::new("abcd", "v")).is_ok());
        assert!(codec.encode(&UpdateRecord::new("abcde", "v")).is_err());
    }

    #[test]
    fn wrong_frame_count() {
        let err = decode_record(&frames(&[b"k", &[0; 8]])).unwrap_err();
        assert!(err.is_malformed());

        let err = decode_record(&frames(&[b"k", &[0; 8], b"", b"", b""])).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn wrong_sequence_width() {
        let err = decode_record(&frames(&[b"k", &[0; 4], b"v"])).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn property_length_overrun() {
        let block: &[u8] = &[0, 0, 0, 9, b'a'];
        let err = decode_record(&frames(&[b"k", &[0; 8], block, b"v"])).unwrap_err();
        assert!(err.is_malformed());

        let block: &[u8] = &[0, 0];
        let err = decode_record(&frames(&[b"k", &[0; 8], block, b"v"])).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn invalid_utf8_key() {
        let err = decode_record(&frames(&[&[0xff, 0xfe], &[0; 8], b"v"])).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn empty_properties_block_decodes() {
        let record = decode_record(&frames(&[b"k", &[0; 8], b"", b"v"])).unwrap();
        assert!(record.properties.is_empty());
        assert_eq!(&record.body[..], b"v");
    }

    #[test]
    fn sentinel_roundtrip() {
        let sentinel = UpdateRecord::sentinel(u64::MAX, "id");
        let decoded = decode_record(&encode_record(&sentinel).unwrap()).unwrap();
        assert!(decoded.is_sentinel());
        assert_eq!(decoded.sequence, u64::MAX);
    }
}
