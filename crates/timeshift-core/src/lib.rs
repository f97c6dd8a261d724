//! timeshift core
//!
//! A time-delayed stream buffer: bytes written now become readable only once they are at least
//! `delay` old. Useful for time-shifting a live feed so that consumers see it a fixed interval
//! behind real time.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐
//! │  Producer   │
//! └──────┬──────┘
//!        │ write(bytes)
//!        ▼
//! ┌─────────────────┐
//! │ DelayBuffer     │
//! │ - Stamps        │  chunk frames  ┌──────────────────────┐
//! │ - Encodes       │ ─────────────► │ Store                │
//! │                 │                │ VecDeque<u8> / spool │
//! │ - Decodes       │ ◄───────────── │                      │
//! │ - Gates on age  │                └──────────────────────┘
//! └────────┬────────┘
//!          │ read(dest), once each chunk is `delay` old
//!          ▼
//! ┌─────────────┐
//! │  Consumer   │
//! └─────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`DelayBuffer`]: the buffer itself; implements `std::io::Read` and `std::io::Write`
//! - [`ChunkCodec`]: length-prefixed, CRC32-checked chunk frames
//! - [`Clock`]: time source, [`SystemClock`] in production, [`ManualClock`] in tests
//! - [`FileSpool`]: disk-backed store for long delays
//! - [`SharedDelayBuffer`]: `Arc<Mutex<_>>` handle for writing and reading on different threads
//!
//! ## Example
//!
//! ```
//! use std::collections::VecDeque;
//! use std::time::Duration;
//! use timeshift_core::{DelayBuffer, ManualClock, Timestamp};
//!
//! let clock = ManualClock::new(Timestamp::from_nanos(0));
//! let mut buffer = DelayBuffer::with_clock(
//!     Duration::from_secs(1),
//!     VecDeque::<u8>::new(),
//!     clock.clone(),
//! );
//!
//! buffer.write(b"abc")?;
//!
//! let mut out = [0u8; 3];
//! assert_eq!(buffer.read(&mut out)?, 0); // too soon
//!
//! clock.advance(Duration::from_secs(1));
//! assert_eq!(buffer.read(&mut out)?, 3);
//! assert_eq!(&out, b"abc");
//! # Ok::<(), timeshift_core::Error>(())
//! ```

pub mod buffer;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod error;
pub mod shared;
pub mod spool;

pub use buffer::{BufferStats, DelayBuffer};
pub use chunk::{Chunk, ChunkCodec, Frame};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::DelayConfig;
pub use error::{Error, Result};
pub use shared::SharedDelayBuffer;
pub use spool::FileSpool;
