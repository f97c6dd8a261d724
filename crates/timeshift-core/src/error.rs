//! Error Types for timeshift
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - Failures reported by the underlying store while appending or reading chunks
//!
//! ### Data Integrity Errors
//! - `ChecksumMismatch`: a chunk's CRC32 does not match its timestamp and payload
//! - `ChunkTooLarge`: a chunk payload exceeds the configured maximum (on write or on decode)
//!
//! ### Configuration Errors
//! - `InvalidConfig`: a [`DelayConfig`](crate::DelayConfig) failed validation
//!
//! ### Concurrency Errors
//! - `Poisoned`: a thread panicked while holding a [`SharedDelayBuffer`](crate::SharedDelayBuffer)
//!
//! None of these are fatal to a buffer: each one is scoped to the call that returned it and the
//! caller may retry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chunk checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Chunk size {size} exceeds maximum {max}")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Delay buffer lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Poisoned => std::io::Error::new(std::io::ErrorKind::Other, err),
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
