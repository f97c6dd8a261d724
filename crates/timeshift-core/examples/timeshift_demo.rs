//! Timeshift Demo
//!
//! Writes a few lines into a one-second delay buffer and polls it, printing each line only once
//! it has aged out.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p timeshift-core --example timeshift_demo
//! ```

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};
use timeshift_core::DelayBuffer;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let started = Instant::now();
    let mut buffer = DelayBuffer::new(Duration::from_secs(1), VecDeque::<u8>::new());

    for line in ["first\n", "second\n", "third\n"] {
        let n = buffer.write(line.as_bytes())?;
        info!(bytes = n, elapsed_ms = started.elapsed().as_millis() as u64, "Wrote line");
        thread::sleep(Duration::from_millis(300));
    }

    let mut dest = [0u8; 64];
    loop {
        let n = buffer.read(&mut dest)?;
        if n == 0 {
            let stats = buffer.stats();
            if stats.pending_chunks == 0 && stats.chunks_released == stats.chunks_written {
                break;
            }
            thread::sleep(Duration::from_millis(50));
            continue;
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            text = %String::from_utf8_lossy(&dest[..n]).trim_end(),
            "Released"
        );
    }

    Ok(())
}
