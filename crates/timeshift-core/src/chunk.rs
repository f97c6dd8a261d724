//! Chunk Data Structure and Wire Codec
//!
//! A [`Chunk`] is the payload of exactly one `write` call, tagged with the instant it was written.
//! Chunks are never split or merged on the write side.
//!
//! ## Frame Format
//!
//! Every chunk is stored as a self-describing, little-endian frame:
//!
//! ```text
//! ┌──────────────┬──────────┬───────────┬───────────┐
//! │ Payload Size │ CRC32    │ Timestamp │ Payload   │
//! │ (4 bytes)    │(4 bytes) │(8 bytes)  │(N bytes)  │
//! └──────────────┴──────────┴───────────┴───────────┘
//! ```
//!
//! - **Payload Size** is known before the payload is read, so decoding needs no look-ahead.
//! - **CRC32** covers the timestamp and payload bytes.
//! - **Timestamp** is signed nanoseconds since the Unix epoch.
//!
//! The encoding is private to one buffer's lifetime; there is no version field.
//!
//! ## Abandon Markers
//!
//! A payload size of exactly [`ABANDON_MARKER`] (top bit set, no payload) is not a chunk. It
//! cancels the frame immediately before it. The writer emits one after a store failed part way
//! through a frame: it completes the torn frame so framing stays aligned, then appends the marker
//! so readers drop the chunk whose `write` reported an error.
//!
//! ## Decoding
//!
//! [`ChunkCodec`] implements `tokio_util`'s [`Decoder`], yielding [`Frame`]s. It returns `Ok(None)`
//! until a whole frame is buffered, so a frame whose tail has not reached the store yet is simply "not yet".
//! A frame whose checksum fails is consumed and reported; an oversized length prefix cannot be
//! resynchronised, so the undecoded bytes are discarded before the error is returned.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::clock::Timestamp;
use crate::error::{Error, Result};

/// Bytes of framing in front of every payload.
pub const HEADER_LEN: usize = 4 + 4 + 8;

/// Default maximum payload size (64MB)
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Size field value reserved for abandon markers.
pub const ABANDON_MARKER: u32 = 0x8000_0000;

/// Largest payload the size field can describe without colliding with [`ABANDON_MARKER`].
pub const MAX_CHUNK_LIMIT: usize = (ABANDON_MARKER - 1) as usize;

/// One timestamped write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// When the chunk was written
    pub timestamp: Timestamp,

    /// Bytes exactly as handed to `write`
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(timestamp: Timestamp, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            payload: payload.into(),
        }
    }

    /// Size of this chunk once framed.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Chunk(Chunk),

    /// The preceding frame was never successfully written and must be dropped
    Abandon,
}

/// Length-prefixed, checksummed chunk codec.
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    max_chunk_size: usize,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkCodec {
    pub fn new() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }

    pub fn with_max_chunk_size(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.min(MAX_CHUNK_LIMIT),
        }
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Frame `payload` stamped with `timestamp` onto the end of `dst`.
    ///
    /// Used by the write path, which holds a borrowed slice rather than an owned [`Chunk`].
    pub fn encode_parts(
        &self,
        timestamp: Timestamp,
        payload: &[u8],
        dst: &mut BytesMut,
    ) -> Result<()> {
        if payload.len() > self.max_chunk_size {
            return Err(Error::ChunkTooLarge {
                size: payload.len(),
                max: self.max_chunk_size,
            });
        }

        let stamp = timestamp.as_nanos().to_le_bytes();

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.put_u32_le(checksum(&stamp, payload));
        dst.put_slice(&stamp);
        dst.put_slice(payload);

        Ok(())
    }

    /// Append an abandon marker cancelling the frame written just before it.
    pub fn encode_abandon(&self, dst: &mut BytesMut) {
        let stamp = 0i64.to_le_bytes();

        dst.reserve(HEADER_LEN);
        dst.put_u32_le(ABANDON_MARKER);
        dst.put_u32_le(checksum(&stamp, &[]));
        dst.put_slice(&stamp);
    }
}

fn checksum(stamp: &[u8; 8], payload: &[u8]) -> u32 {
    let mut crc = crc32fast::Hasher::new();
    crc.update(stamp);
    crc.update(payload);
    crc.finalize()
}

impl Decoder for ChunkCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek at the length without consuming
        let raw_size = (&src[..4]).get_u32_le();
        let abandon = raw_size == ABANDON_MARKER;
        let size = if abandon { 0 } else { raw_size as usize };

        if size > self.max_chunk_size {
            warn!(
                size,
                max = self.max_chunk_size,
                discarded = src.len(),
                "Oversized chunk frame, discarding undecoded bytes"
            );
            src.clear();
            return Err(Error::ChunkTooLarge {
                size,
                max: self.max_chunk_size,
            });
        }

        let total = HEADER_LEN + size;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(4);
        let expected = src.get_u32_le();
        let mut stamp = [0u8; 8];
        src.copy_to_slice(&mut stamp);
        let payload = src.split_to(size).freeze();

        let actual = checksum(&stamp, &payload);
        if actual != expected {
            warn!(
                expected,
                actual,
                size,
                "Corrupted chunk frame (CRC mismatch), skipping"
            );
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        if abandon {
            return Ok(Some(Frame::Abandon));
        }

        Ok(Some(Frame::Chunk(Chunk {
            timestamp: Timestamp::from_nanos(i64::from_le_bytes(stamp)),
            payload,
        })))
    }
}

impl Encoder<Chunk> for ChunkCodec {
    type Error = Error;

    fn encode(&mut self, item: Chunk, dst: &mut BytesMut) -> Result<()> {
        self.encode_parts(item.timestamp, &item.payload, dst)
    }
}
