//! End-to-end behaviour of the delay buffer: release timing, ordering, partial reads, and
//! file-backed spools.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::time::Duration;

use tempfile::TempDir;
use timeshift_core::chunk::HEADER_LEN;
use timeshift_core::{
    ChunkCodec, DelayBuffer, DelayConfig, FileSpool, ManualClock, SharedDelayBuffer, Timestamp,
};

const SEC: Duration = Duration::from_secs(1);

fn start() -> Timestamp {
    Timestamp::from_nanos(1_600_000_000_000_000_000)
}

fn memory_buffer(delay: Duration) -> (DelayBuffer<VecDeque<u8>, ManualClock>, ManualClock) {
    let clock = ManualClock::new(start());
    let buffer = DelayBuffer::with_clock(delay, VecDeque::new(), clock.clone());
    (buffer, clock)
}

/// Read into a zeroed destination of `len` bytes and return the whole destination.
fn read_padded<S: Read + Write>(buffer: &mut DelayBuffer<S, ManualClock>, len: usize) -> Vec<u8> {
    let mut dest = vec![0u8; len];
    buffer.read(&mut dest).unwrap();
    dest
}

fn drain<S: Read + Write>(buffer: &mut DelayBuffer<S, ManualClock>, step: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut dest = vec![0u8; step];
    loop {
        let n = buffer.read(&mut dest).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&dest[..n]);
    }
}

// ---------------------------------------------------------------
// Release timing
// ---------------------------------------------------------------

#[test]
fn test_twenty_second_delay_scenario() {
    let (mut buffer, clock) = memory_buffer(SEC * 20);

    let samples: [(u32, &[u8]); 4] = [(0, b"ab"), (10, b"cd"), (20, b"ef"), (25, b"ghij")];
    for (offset, data) in samples {
        clock.set(start().saturating_add(SEC * offset));
        assert_eq!(buffer.write(data).unwrap(), data.len());
    }

    clock.set(start());
    assert_eq!(read_padded(&mut buffer, 2), [0, 0]);

    clock.set(start().saturating_add(SEC * 21));
    assert_eq!(read_padded(&mut buffer, 3), [b'a', b'b', 0]);

    clock.set(start().saturating_add(SEC * 51));
    assert_eq!(read_padded(&mut buffer, 1), b"c");
    assert_eq!(read_padded(&mut buffer, 1), b"d");
    assert_eq!(read_padded(&mut buffer, 4), b"efgh");
    assert_eq!(read_padded(&mut buffer, 3), [b'i', b'j', 0]);
    assert_eq!(read_padded(&mut buffer, 5), [0, 0, 0, 0, 0]);
}

#[test]
fn test_no_chunk_released_before_its_delay() {
    let delay = SEC * 3;
    let (mut buffer, clock) = memory_buffer(delay);

    // One write per second for ten seconds
    for i in 0..10u8 {
        clock.set(start().saturating_add(SEC * u32::from(i)));
        buffer.write(&[i]).unwrap();
    }

    // Step through time in half seconds; each released byte must be at least `delay` old
    let mut released = Vec::new();
    for half_secs in 0..30u32 {
        let now = start().saturating_add(Duration::from_millis(500) * half_secs);
        clock.set(now);
        for byte in drain(&mut buffer, 4) {
            let written_at = start().saturating_add(SEC * u32::from(byte));
            assert!(
                now.duration_since(written_at) >= delay,
                "byte {byte} released {:?} after write",
                now.duration_since(written_at)
            );
            released.push(byte);
        }
    }

    assert_eq!(released, (0..10u8).collect::<Vec<_>>());
}

#[test]
fn test_quiescent_reads_return_zero_repeatedly() {
    let (mut buffer, _clock) = memory_buffer(SEC * 60);
    buffer.write(b"later").unwrap();

    for _ in 0..5 {
        assert_eq!(buffer.read(&mut [0u8; 16]).unwrap(), 0);
    }
    assert_eq!(buffer.stats().pending_chunks, 1);
}

// ---------------------------------------------------------------
// Ordering and partial reads
// ---------------------------------------------------------------

#[test]
fn test_concatenated_reads_reproduce_writes() {
    let (mut buffer, clock) = memory_buffer(SEC);

    let mut expected = Vec::new();
    for i in 0..200usize {
        let payload: Vec<u8> = (0..(i % 37)).map(|j| (i * 31 + j) as u8).collect();
        buffer.write(&payload).unwrap();
        expected.extend_from_slice(&payload);
        clock.advance(Duration::from_millis(10));
    }

    clock.advance(SEC);

    // Odd read sizes force reads to straddle chunk boundaries
    let mut out = Vec::new();
    for step in [1usize, 3, 7, 64, 5].iter().cycle() {
        let mut dest = vec![0u8; *step];
        let n = buffer.read(&mut dest).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&dest[..n]);
    }

    assert_eq!(out, expected);
    let stats = buffer.stats();
    assert_eq!(stats.chunks_written, 200);
    assert_eq!(stats.chunks_released, 200);
    assert_eq!(stats.released_bytes, 0);
}

#[test]
fn test_interleaved_writes_and_reads() {
    let (mut buffer, clock) = memory_buffer(SEC * 2);
    let mut out = Vec::new();

    for i in 0..20u8 {
        buffer.write(&[i, i]).unwrap();
        out.extend(drain(&mut buffer, 3));
        clock.advance(SEC);
    }
    clock.advance(SEC * 2);
    out.extend(drain(&mut buffer, 3));

    let expected: Vec<u8> = (0..20u8).flat_map(|i| [i, i]).collect();
    assert_eq!(out, expected);
}

#[test]
fn test_empty_writes_are_invisible_to_readers() {
    let (mut buffer, clock) = memory_buffer(SEC);
    buffer.write(b"").unwrap();
    buffer.write(b"x").unwrap();
    buffer.write(b"").unwrap();
    clock.advance(SEC);

    assert_eq!(drain(&mut buffer, 8), b"x");
    assert_eq!(buffer.stats().chunks_released, 3);
}

// ---------------------------------------------------------------
// Disk-backed spools
// ---------------------------------------------------------------

#[test]
fn test_file_spool_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(start());
    let spool = FileSpool::create(temp_dir.path().join("feed.spool")).unwrap();
    let mut buffer = DelayBuffer::with_clock(SEC * 5, spool, clock.clone());

    buffer.write(b"first ").unwrap();
    clock.advance(SEC);
    buffer.write(b"second").unwrap();

    assert_eq!(buffer.get_ref().len().unwrap(), (2 * HEADER_LEN + 12) as u64);

    clock.advance(SEC * 4);
    assert_eq!(drain(&mut buffer, 4), b"first ");

    clock.advance(SEC);
    assert_eq!(drain(&mut buffer, 4), b"second");
}

#[test]
fn test_file_spool_torn_frame_waits_for_completion() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("torn.spool");
    let clock = ManualClock::new(start());
    let mut buffer =
        DelayBuffer::with_clock(Duration::ZERO, FileSpool::create(&path).unwrap(), clock);

    // Another process appends a frame in two halves
    let mut frame = bytes::BytesMut::new();
    ChunkCodec::new()
        .encode_parts(start(), b"from outside", &mut frame)
        .unwrap();
    let mut appender = OpenOptions::new().append(true).open(&path).unwrap();

    appender.write_all(&frame[..10]).unwrap();
    assert_eq!(buffer.read(&mut [0u8; 32]).unwrap(), 0);
    assert_eq!(buffer.stats().undecoded_bytes, 10);

    appender.write_all(&frame[10..]).unwrap();
    assert_eq!(drain(&mut buffer, 32), b"from outside");
}

#[test]
fn test_reopened_spool_replays_expired_chunks() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("replay.spool");
    let clock = ManualClock::new(start());

    {
        let mut buffer =
            DelayBuffer::with_clock(SEC * 10, FileSpool::create(&path).unwrap(), clock.clone());
        buffer.write(b"survives restart").unwrap();
    }

    clock.advance(SEC * 10);
    let mut buffer = DelayBuffer::with_clock(SEC * 10, FileSpool::open(&path).unwrap(), clock);
    assert_eq!(drain(&mut buffer, 64), b"survives restart");
}

/// File spool whose disk "fills up" after `budget` more bytes.
struct FullDisk {
    spool: FileSpool,
    budget: Option<usize>,
}

impl Read for FullDisk {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.spool.read(buf)
    }
}

impl Write for FullDisk {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = match self.budget {
            Some(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "no space left on device",
                ))
            }
            Some(left) => left.min(buf.len()),
            None => buf.len(),
        };
        let n = self.spool.write(&buf[..n])?;
        self.budget = self.budget.map(|left| left - n);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.spool.flush()
    }
}

#[test]
fn test_torn_spool_write_keeps_later_chunks_intact() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("full.spool");
    let clock = ManualClock::new(start());
    let store = FullDisk {
        spool: FileSpool::create(&path).unwrap(),
        budget: None,
    };
    let mut buffer = DelayBuffer::with_clock(SEC, store, clock.clone());

    buffer.write(b"before ").unwrap();
    buffer.get_mut().budget = Some(HEADER_LEN / 2);
    assert!(buffer.write(b"lost").is_err());

    // Space frees up again
    buffer.get_mut().budget = None;
    buffer.write(b"after").unwrap();

    clock.advance(SEC);
    assert_eq!(drain(&mut buffer, 4), b"before after");

    // A fresh reader over the same file skips the abandoned chunk too
    let mut replay = DelayBuffer::with_clock(SEC, FileSpool::open(&path).unwrap(), clock);
    assert_eq!(drain(&mut replay, 64), b"before after");
}

// ---------------------------------------------------------------
// Configuration and shared handles
// ---------------------------------------------------------------

#[test]
fn test_config_from_toml_drives_buffer() {
    let config: DelayConfig = toml::from_str(
        r#"
            delay_ms = 250
            max_chunk_size = 8
        "#,
    )
    .unwrap();

    let clock = ManualClock::new(start());
    let mut buffer = DelayBuffer::with_config(config, VecDeque::<u8>::new(), clock.clone()).unwrap();
    assert_eq!(buffer.delay(), Duration::from_millis(250));

    assert!(buffer.write(b"123456789").is_err());
    buffer.write(b"12345678").unwrap();

    clock.advance(Duration::from_millis(249));
    assert_eq!(drain(&mut buffer, 16), b"");
    clock.advance(Duration::from_millis(1));
    assert_eq!(drain(&mut buffer, 16), b"12345678");
}

#[test]
fn test_shared_buffer_composes_with_io_copy() {
    let clock = ManualClock::new(start());
    let mut shared = SharedDelayBuffer::new(DelayBuffer::with_clock(
        SEC,
        VecDeque::<u8>::new(),
        clock.clone(),
    ));

    let mut source: &[u8] = b"copied through the delay";
    std::io::copy(&mut source, &mut shared).unwrap();

    clock.advance(SEC);
    let mut out = Vec::new();
    let mut dest = [0u8; 5];
    loop {
        let n = shared.read(&mut dest).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&dest[..n]);
    }
    assert_eq!(out, b"copied through the delay");
}
