//! File-backed Chunk Store
//!
//! For long delays or high write rates the encoded chunk stream should live on disk rather than in
//! memory. [`FileSpool`] is a `Read + Write` store over one file with two independent handles:
//!
//! ```text
//!  write() ─→ [append handle] ─→ spool file ─→ [read handle] ─→ read()
//!                                  ▲ grows        ▲ cursor only moves forward
//! ```
//!
//! The append handle always writes at the end of the file and the read handle keeps its own
//! cursor, so writes never disturb where decoding left off. A read at the current end of the file
//! returns `Ok(0)`; the delay buffer treats that as "no data yet" and tries again on the next call.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use timeshift_core::{DelayBuffer, FileSpool};
//!
//! let spool = FileSpool::create("/var/tmp/feed.spool")?;
//! let mut buffer = DelayBuffer::new(Duration::from_secs(300), spool);
//! buffer.write(b"frame")?;
//! # Ok::<(), timeshift_core::Error>(())
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;

/// Append-only spool file with a separate read cursor.
#[derive(Debug)]
pub struct FileSpool {
    path: PathBuf,
    writer: File,
    reader: File,
    sync_on_flush: bool,
}

impl FileSpool {
    /// Create (or truncate) a spool at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        File::create(&path)?;
        Self::open_handles(path)
    }

    /// Open an existing spool, or create an empty one, reading from the beginning.
    ///
    /// Chunks left by an earlier run are replayed; any whose delay has already passed are
    /// released on the first read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_handles(path.as_ref().to_path_buf())
    }

    fn open_handles(path: PathBuf) -> Result<Self> {
        let writer = OpenOptions::new().create(true).append(true).open(&path)?;
        let reader = File::open(&path)?;
        let size = writer.metadata()?.len();

        info!(path = ?path, size, "Spool opened");

        Ok(Self {
            path,
            writer,
            reader,
            sync_on_flush: false,
        })
    }

    /// fdatasync the spool on every flush (every chunk, when used under a delay buffer).
    pub fn sync_on_flush(mut self, enabled: bool) -> Self {
        self.sync_on_flush = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the spool file in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.writer.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Write for FileSpool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        if self.sync_on_flush {
            self.writer.sync_data()?;
        }
        Ok(())
    }
}

impl Read for FileSpool {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_follow_appends() {
        let temp_dir = TempDir::new().unwrap();
        let mut spool = FileSpool::create(temp_dir.path().join("a.spool")).unwrap();

        spool.write_all(b"abc").unwrap();
        let mut out = [0u8; 8];
        assert_eq!(spool.read(&mut out).unwrap(), 3);
        assert_eq!(&out[..3], b"abc");

        // At the end of the file: nothing yet, not an error
        assert_eq!(spool.read(&mut out).unwrap(), 0);

        spool.write_all(b"de").unwrap();
        assert_eq!(spool.read(&mut out).unwrap(), 2);
        assert_eq!(&out[..2], b"de");
        assert_eq!(spool.len().unwrap(), 5);
    }

    #[test]
    fn test_create_truncates_and_open_replays() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("b.spool");

        {
            let mut spool = FileSpool::create(&path).unwrap().sync_on_flush(true);
            spool.write_all(b"old").unwrap();
            spool.flush().unwrap();
        }

        let mut reopened = FileSpool::open(&path).unwrap();
        let mut out = Vec::new();
        reopened.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"old");

        let fresh = FileSpool::create(&path).unwrap();
        assert!(fresh.is_empty().unwrap());
        assert_eq!(fresh.path(), path.as_path());
    }

    #[test]
    fn test_open_creates_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let spool = FileSpool::open(temp_dir.path().join("missing.spool")).unwrap();
        assert_eq!(spool.len().unwrap(), 0);
    }
}
