//! Thread-safe Delay Buffer Handle
//!
//! [`DelayBuffer`] is single-owner. [`SharedDelayBuffer`] puts it behind an `Arc<Mutex<_>>` so a
//! producer thread can write while a consumer thread (or a timer task) reads:
//!
//! ```
//! use std::collections::VecDeque;
//! use std::time::Duration;
//! use timeshift_core::{DelayBuffer, SharedDelayBuffer};
//!
//! let shared = SharedDelayBuffer::new(DelayBuffer::new(Duration::ZERO, VecDeque::<u8>::new()));
//! let writer = shared.clone();
//!
//! std::thread::spawn(move || writer.write(b"tick").unwrap())
//!     .join()
//!     .unwrap();
//!
//! let mut out = [0u8; 4];
//! assert_eq!(shared.read(&mut out).unwrap(), 4);
//! ```
//!
//! Each call holds the lock only for one `write` or one `read`.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::buffer::{BufferStats, DelayBuffer};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

/// Cloneable handle to one [`DelayBuffer`].
pub struct SharedDelayBuffer<S, C = SystemClock> {
    inner: Arc<Mutex<DelayBuffer<S, C>>>,
}

impl<S, C> Clone for SharedDelayBuffer<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, C> SharedDelayBuffer<S, C>
where
    S: Read + Write,
    C: Clock,
{
    pub fn new(buffer: DelayBuffer<S, C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(buffer)),
        }
    }

    /// Exclusive access for a sequence of operations.
    pub fn lock(&self) -> Result<MutexGuard<'_, DelayBuffer<S, C>>> {
        self.inner.lock().map_err(|_| Error::Poisoned)
    }

    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.lock()?.write(data)
    }

    pub fn read(&self, dest: &mut [u8]) -> Result<usize> {
        self.lock()?.read(dest)
    }

    pub fn stats(&self) -> Result<BufferStats> {
        Ok(self.lock()?.stats())
    }

    pub fn delay(&self) -> Result<Duration> {
        Ok(self.lock()?.delay())
    }
}

impl<S, C> Write for SharedDelayBuffer<S, C>
where
    S: Read + Write,
    C: Clock,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(SharedDelayBuffer::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut *self.lock()?)
    }
}

impl<S, C> Read for SharedDelayBuffer<S, C>
where
    S: Read + Write,
    C: Clock,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(SharedDelayBuffer::read(self, buf)?)
    }
}
