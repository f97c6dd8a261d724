//! timeshift
//!
//! Replays stdin on stdout after a fixed delay.
//!
//! ## Quick Start
//!
//! ```bash
//! # Watch a log five seconds behind real time
//! tail -f app.log | timeshift --delay 5s
//!
//! # Hold a feed for ten minutes, spooled to disk instead of memory
//! ./produce | timeshift --delay 10m --spool /var/tmp/feed.spool | ./consume
//! ```
//!
//! ## Configuration
//!
//! Every flag can also be set through the environment (`TIMESHIFT_DELAY`, `TIMESHIFT_SPOOL`, ...)
//! or through a TOML file passed with `--config`. Flags win over the file.
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default: `info`), so stdout carries only
//! the delayed data.
//!
//! ## Shutdown
//!
//! On stdin EOF the tool keeps running until the last chunk has aged out and been written, then
//! exits. Ctrl-C exits immediately and drops anything still inside the delay window.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use timeshift_core::{DelayBuffer, Error, FileSpool, SharedDelayBuffer, SystemClock};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

mod config;

use config::{parse_duration, Options, Settings};

#[derive(Parser)]
#[command(name = "timeshift")]
#[command(about = "Replay stdin on stdout after a fixed delay", long_about = None)]
struct Cli {
    /// How long to hold each chunk (e.g. 500ms, 5s, 2m, 1h)
    #[arg(short, long, env = "TIMESHIFT_DELAY", value_parser = parse_duration)]
    delay: Option<Duration>,

    /// Spool file for the delayed data (default: in memory)
    #[arg(short, long, env = "TIMESHIFT_SPOOL")]
    spool: Option<PathBuf>,

    /// fdatasync the spool after every chunk
    #[arg(long, env = "TIMESHIFT_SYNC_SPOOL")]
    sync_spool: bool,

    /// How often to check for released data [default: 20ms]
    #[arg(long, env = "TIMESHIFT_POLL_INTERVAL", value_parser = parse_duration)]
    poll_interval: Option<Duration>,

    /// Largest chunk accepted, in bytes [default: 64MB]
    #[arg(long, env = "TIMESHIFT_MAX_CHUNK_SIZE")]
    max_chunk_size: Option<usize>,

    /// Bytes read from stdin per chunk [default: 8192]
    #[arg(long, env = "TIMESHIFT_READ_SIZE")]
    read_size: Option<usize>,

    /// TOML config file
    #[arg(short, long, env = "TIMESHIFT_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            delay: self.delay,
            spool: self.spool.clone(),
            // A bare switch can only turn syncing on
            sync_spool: self.sync_spool.then_some(true),
            poll_interval: self.poll_interval,
            max_chunk_size: self.max_chunk_size,
            read_size: self.read_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let file_options = match &cli.config {
        Some(path) => Options::load(path)?,
        None => Options::default(),
    };
    let settings = cli.options().or(file_options).resolve()?;

    info!(
        delay_ms = settings.delay.as_millis() as u64,
        spool = ?settings.spool,
        poll_interval_ms = settings.poll_interval.as_millis() as u64,
        "Starting timeshift"
    );

    match &settings.spool {
        Some(path) => {
            let spool = FileSpool::create(path)
                .with_context(|| format!("Failed to create spool {}", path.display()))?
                .sync_on_flush(settings.sync_spool);
            let buffer = DelayBuffer::with_config(settings.delay_config(), spool, SystemClock)?;
            run(SharedDelayBuffer::new(buffer), &settings).await
        }
        None => {
            let buffer = DelayBuffer::with_config(
                settings.delay_config(),
                VecDeque::<u8>::new(),
                SystemClock,
            )?;
            run(SharedDelayBuffer::new(buffer), &settings).await
        }
    }
}

/// Pump stdin into `shared` and released bytes out to stdout until the input is exhausted and
/// fully delivered.
async fn run<S>(shared: SharedDelayBuffer<S>, settings: &Settings) -> Result<()>
where
    S: Read + Write + Send + 'static,
{
    // Blocking stdin reads live on a plain thread so an early exit never waits on them
    let (done_tx, mut done_rx) = oneshot::channel();
    let writer = shared.clone();
    let read_size = settings.read_size;
    std::thread::Builder::new()
        .name("timeshift-stdin".to_string())
        .spawn(move || {
            let _ = done_tx.send(pump_stdin(writer, read_size));
        })
        .context("Failed to spawn stdin thread")?;

    let mut ticker = tokio::time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut stdout = tokio::io::stdout();
    let mut out = vec![0u8; settings.read_size];
    let mut input_closed = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let idle = forward_released(&shared, &mut out, &mut stdout).await?;
                if input_closed && idle {
                    info!("All input delivered, exiting");
                    return Ok(());
                }
            }
            result = &mut done_rx, if !input_closed => {
                let bytes = result.context("stdin thread exited without reporting")??;
                info!(bytes, "Input closed, draining delayed data");
                input_closed = true;
            }
            _ = tokio::signal::ctrl_c() => {
                let stats = shared.stats()?;
                warn!(
                    pending_chunks = stats.pending_chunks,
                    pending_bytes = stats.pending_bytes,
                    "Interrupted, dropping undelivered data"
                );
                return Ok(());
            }
        }
    }
}

/// Copy stdin into the delay buffer, one chunk per successful read.
fn pump_stdin<S>(writer: SharedDelayBuffer<S>, read_size: usize) -> Result<u64>
where
    S: Read + Write,
{
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut buf = vec![0u8; read_size];
    let mut total = 0u64;

    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read stdin"),
        };

        writer
            .write(&buf[..n])
            .context("Failed to write into delay buffer")?;
        total += n as u64;
    }
}

/// Write everything currently released to `stdout`.
///
/// Returns true once nothing is left inside the buffer.
async fn forward_released<S, W>(
    shared: &SharedDelayBuffer<S>,
    out: &mut [u8],
    stdout: &mut W,
) -> Result<bool>
where
    S: Read + Write,
    W: AsyncWrite + Unpin,
{
    let mut forwarded = 0usize;

    loop {
        let n = match shared.read(out) {
            Ok(n) => n,
            // Bad frames are dropped; keep going with whatever follows
            Err(e @ (Error::ChecksumMismatch { .. } | Error::ChunkTooLarge { .. })) => {
                warn!(error = %e, "Skipping corrupt chunk");
                continue;
            }
            Err(e) => bail!("Failed to read delay buffer: {}", e),
        };
        if n == 0 {
            break;
        }
        stdout
            .write_all(&out[..n])
            .await
            .context("Failed to write stdout")?;
        forwarded += n;
    }

    if forwarded > 0 {
        stdout.flush().await.context("Failed to flush stdout")?;
        debug!(bytes = forwarded, "Forwarded released data");
    }

    let stats = shared.stats()?;
    Ok(stats.pending_chunks == 0 && stats.released_bytes == 0 && stats.undecoded_bytes == 0)
}
