//! Delay Buffer
//!
//! A [`DelayBuffer`] wraps a store (anything that is `Read + Write`) and turns it into a stream
//! that replays what was written only once each write is at least `delay` old.
//!
//! ## Architecture
//!
//! ```text
//! write(bytes) ─→ stamp ─→ ChunkCodec ─→ store (append)
//!
//! read(dest)   ─→ store ─→ ChunkCodec ─→ pending ─→ head ─→ dest
//!                          (decode)      (not yet   (released,
//!                                         eligible)  undelivered)
//! ```
//!
//! Every `read` first drains newly stored chunks into the pending queue, then moves the eligible
//! prefix of that queue into the head buffer, then copies from the head into the caller's slice.
//!
//! ## Eligibility
//!
//! A chunk stamped `t` is readable once `t <= now - delay`. Stamps never decrease in write order
//! (the writer clamps a clock that steps backwards), so the first ineligible chunk means nothing
//! behind it is eligible either. Draining and promotion both stop there, which keeps roughly one
//! delay window of traffic in memory and leaves the rest in the store.
//!
//! ## Empty reads
//!
//! `read` returning `Ok(0)` means nothing has aged out yet. It is not end-of-stream, and it holds
//! for the [`std::io::Read`] impl as well.
//!
//! ## Failed writes
//!
//! A store can fail after accepting part of a frame. The rest of that frame plus an abandon
//! marker are kept as repair bytes and written ahead of anything else, so the store never holds a
//! torn frame followed by more data. Until the repair lands, reads only hand out bytes that were
//! already released. Readers drop the abandoned chunk silently.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::chunk::{Chunk, ChunkCodec, Frame};
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::DelayConfig;
use crate::error::Result;

/// Bytes pulled from the store per fill of the decode buffer.
const READ_BLOCK_SIZE: usize = 8 * 1024;

/// Point-in-time view of a buffer's internal queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// Decoded chunks still inside the delay window
    pub pending_chunks: usize,

    /// Payload bytes held by those chunks
    pub pending_bytes: usize,

    /// Released bytes waiting for a reader
    pub released_bytes: usize,

    /// Bytes read from the store but not yet decoded into a chunk
    pub undecoded_bytes: usize,

    /// Bytes still owed to the store to close a torn frame
    pub unrepaired_bytes: usize,

    /// Chunks successfully handed to the store
    pub chunks_written: u64,

    /// Chunks promoted into the head buffer
    pub chunks_released: u64,
}

/// Time-delayed byte stream over a `Read + Write` store.
///
/// Single-owner: both paths take `&mut self`. Use
/// [`SharedDelayBuffer`](crate::SharedDelayBuffer) to write and read from different threads.
pub struct DelayBuffer<S, C = SystemClock> {
    store: S,
    clock: C,
    codec: ChunkCodec,
    delay: Duration,

    /// Decoded, not yet eligible, in write order
    pending: VecDeque<Chunk>,

    /// Released, not yet delivered
    head: BytesMut,
    head_shrink_threshold: usize,

    /// Store bytes awaiting a complete frame
    read_buf: BytesMut,
    write_buf: BytesMut,

    /// Tail of a torn frame plus its abandon marker, owed to the store
    repair: BytesMut,

    /// Last stamp handed out; keeps stamps non-decreasing
    last_stamp: Option<Timestamp>,

    chunks_written: u64,
    chunks_released: u64,
}

impl<S> DelayBuffer<S, SystemClock>
where
    S: Read + Write,
{
    /// Buffer over `store` releasing bytes `delay` after they were written, using the wall clock.
    pub fn new(delay: Duration, store: S) -> Self {
        Self::with_clock(delay, store, SystemClock)
    }
}

impl<S, C> DelayBuffer<S, C>
where
    S: Read + Write,
    C: Clock,
{
    pub fn with_clock(delay: Duration, store: S, clock: C) -> Self {
        Self::build(DelayConfig::new(delay), store, clock)
    }

    /// Buffer with every tunable taken from `config`.
    pub fn with_config(config: DelayConfig, store: S, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, store, clock))
    }

    fn build(config: DelayConfig, store: S, clock: C) -> Self {
        debug!(
            delay_ms = config.delay.as_millis() as u64,
            max_chunk_size = config.max_chunk_size,
            "Delay buffer created"
        );

        Self {
            store,
            clock,
            codec: ChunkCodec::with_max_chunk_size(config.max_chunk_size),
            delay: config.delay,
            pending: VecDeque::new(),
            head: BytesMut::new(),
            head_shrink_threshold: config.head_shrink_threshold,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            repair: BytesMut::new(),
            last_stamp: None,
            chunks_written: 0,
            chunks_released: 0,
        }
    }

    /// Stamp `data` with the current time and append it to the store as one chunk.
    ///
    /// Returns `data.len()` once the frame has been written and the store flushed. On error
    /// nothing is counted as written, the in-memory queues are untouched and the chunk is never
    /// delivered, even if part of its frame reached the store.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.finish_repair()?;

        let stamp = self.next_stamp();

        self.write_buf.clear();
        self.codec.encode_parts(stamp, data, &mut self.write_buf)?;

        let (written, result) = write_prefix(&mut self.store, &self.write_buf);
        if let Err(e) = result.and_then(|()| self.store.flush()) {
            if written > 0 {
                self.abandon_frame(written);
            }
            return Err(e.into());
        }

        self.last_stamp = Some(stamp);
        self.chunks_written += 1;

        trace!(
            timestamp = stamp.as_nanos(),
            bytes = data.len(),
            "Chunk written"
        );

        Ok(data.len())
    }

    /// Copy up to `dest.len()` released bytes into `dest`.
    ///
    /// Returns `Ok(0)` when nothing is old enough yet. A decode error from the store is returned
    /// instead of data; bytes already released stay queued for the next call.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        match self.finish_repair() {
            Ok(()) => self.fill_pending()?,
            // Frames past a torn one are misaligned until the repair lands
            Err(e) => warn!(error = %e, "Store still rejecting repair bytes, decoding paused"),
        }
        self.promote();

        let n = dest.len().min(self.head.len());
        dest[..n].copy_from_slice(&self.head[..n]);

        if n == self.head.len() {
            self.reset_head();
        } else {
            self.head.advance(n);
        }

        Ok(n)
    }

    /// Configured delay window.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pending_chunks: self.pending.len(),
            pending_bytes: self.pending.iter().map(|c| c.payload.len()).sum(),
            released_bytes: self.head.len(),
            undecoded_bytes: self.read_buf.len(),
            unrepaired_bytes: self.repair.len(),
            chunks_written: self.chunks_written,
            chunks_released: self.chunks_released,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.store
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Give back the store. Pending and released bytes that were already decoded are dropped.
    pub fn into_inner(self) -> S {
        self.store
    }

    fn can_read(&self, chunk: &Chunk) -> bool {
        chunk.timestamp <= self.clock.now().saturating_sub(self.delay)
    }

    fn next_stamp(&self) -> Timestamp {
        let now = self.clock.now();
        match self.last_stamp {
            Some(last) if now < last => {
                debug!(
                    skew_ns = last.as_nanos().saturating_sub(now.as_nanos()),
                    "Clock moved backwards, reusing previous chunk timestamp"
                );
                last
            }
            _ => now,
        }
    }

    /// Decode chunks from the store into `pending` until the store runs dry or an
    /// ineligible chunk shows up.
    fn fill_pending(&mut self) -> Result<()> {
        // Anything decoded after an ineligible chunk would be ineligible too
        if let Some(last) = self.pending.back() {
            if !self.can_read(last) {
                return Ok(());
            }
        }

        while let Some(frame) = self.decode_next()? {
            match frame {
                Frame::Chunk(chunk) => {
                    let eligible = self.can_read(&chunk);
                    self.pending.push_back(chunk);
                    if !eligible {
                        break;
                    }
                }
                // The marker directly follows the frame it cancels, which is still pending:
                // promotion only runs after the marker has been decoded
                Frame::Abandon => {
                    if let Some(dropped) = self.pending.pop_back() {
                        debug!(
                            timestamp = dropped.timestamp.as_nanos(),
                            bytes = dropped.payload.len(),
                            "Dropped abandoned chunk"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Next complete frame from the store, or `None` if no complete frame is available yet.
    fn decode_next(&mut self) -> Result<Option<Frame>> {
        let mut block = [0u8; READ_BLOCK_SIZE];

        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(Some(frame));
            }

            match self.store.read(&mut block) {
                Ok(0) => return Ok(None),
                Ok(n) => self.read_buf.extend_from_slice(&block[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Move the eligible prefix of `pending` into the head buffer.
    fn promote(&mut self) {
        let mut released = 0usize;
        let mut bytes = 0usize;

        while let Some(front) = self.pending.front() {
            if !self.can_read(front) {
                break;
            }
            if let Some(chunk) = self.pending.pop_front() {
                bytes += chunk.payload.len();
                self.head.extend_from_slice(&chunk.payload);
                released += 1;
            }
        }

        if released > 0 {
            self.chunks_released += released as u64;
            debug!(
                chunks = released,
                bytes,
                pending = self.pending.len(),
                "Promoted chunks past delay window"
            );
        }
    }

    /// Queue the unwritten tail of `write_buf` and an abandon marker for the store.
    fn abandon_frame(&mut self, written: usize) {
        self.repair.extend_from_slice(&self.write_buf[written..]);
        self.codec.encode_abandon(&mut self.repair);

        warn!(
            written,
            frame_len = self.write_buf.len(),
            "Store failed mid-frame, chunk abandoned"
        );
    }

    /// Write any outstanding repair bytes.
    fn finish_repair(&mut self) -> Result<()> {
        if self.repair.is_empty() {
            return Ok(());
        }

        let (written, result) = write_prefix(&mut self.store, &self.repair);
        self.repair.advance(written);
        result.and_then(|()| self.store.flush())?;

        debug!("Torn frame closed");
        Ok(())
    }

    /// Empty the head, dropping its allocation if it grew past the shrink threshold.
    fn reset_head(&mut self) {
        if self.head.capacity() > self.head_shrink_threshold {
            trace!(capacity = self.head.capacity(), "Releasing drained head buffer");
            self.head = BytesMut::new();
        } else {
            self.head.clear();
        }
    }
}

impl<S, C> Write for DelayBuffer<S, C>
where
    S: Read + Write,
    C: Clock,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(DelayBuffer::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.finish_repair()?;
        self.store.flush()
    }
}

/// Write as much of `bytes` as the store accepts, reporting how far it got before any error.
fn write_prefix<W: Write>(store: &mut W, bytes: &[u8]) -> (usize, io::Result<()>) {
    let mut written = 0;

    while written < bytes.len() {
        match store.write(&bytes[written..]) {
            Ok(0) => {
                let err = io::Error::new(ErrorKind::WriteZero, "store accepted no bytes");
                return (written, Err(err));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return (written, Err(e)),
        }
    }

    (written, Ok(()))
}

impl<S, C> Read for DelayBuffer<S, C>
where
    S: Read + Write,
    C: Clock,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(DelayBuffer::read(self, buf)?)
    }
}
