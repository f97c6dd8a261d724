//! Configuration for the timeshift CLI
//!
//! Settings come from three places, highest precedence first:
//!
//! 1. Command-line flags (and their `TIMESHIFT_*` environment variables)
//! 2. The TOML file passed with `--config`
//! 3. Built-in defaults
//!
//! ```toml
//! delay = "30s"
//! spool = "/var/tmp/feed.spool"
//! sync_spool = false
//! poll_interval = "20ms"
//! max_chunk_size = 67108864
//! read_size = 8192
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use timeshift_core::chunk::DEFAULT_MAX_CHUNK_SIZE;
use timeshift_core::DelayConfig;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_READ_SIZE: usize = 8 * 1024;

/// On-disk layout of the config file. Durations are human strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    delay: Option<String>,
    spool: Option<PathBuf>,
    sync_spool: Option<bool>,
    poll_interval: Option<String>,
    max_chunk_size: Option<usize>,
    read_size: Option<usize>,
}

/// One layer of partially specified settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub delay: Option<Duration>,
    pub spool: Option<PathBuf>,
    pub sync_spool: Option<bool>,
    pub poll_interval: Option<Duration>,
    pub max_chunk_size: Option<usize>,
    pub read_size: Option<usize>,
}

impl Options {
    /// Load a layer from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(contents)?;

        let delay = file
            .delay
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(anyhow::Error::msg)
            .context("delay")?;
        let poll_interval = file
            .poll_interval
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(anyhow::Error::msg)
            .context("poll_interval")?;

        Ok(Self {
            delay,
            spool: file.spool,
            sync_spool: file.sync_spool,
            poll_interval,
            max_chunk_size: file.max_chunk_size,
            read_size: file.read_size,
        })
    }

    /// Fill every unset field from `fallback`.
    pub fn or(self, fallback: Options) -> Options {
        Options {
            delay: self.delay.or(fallback.delay),
            spool: self.spool.or(fallback.spool),
            sync_spool: self.sync_spool.or(fallback.sync_spool),
            poll_interval: self.poll_interval.or(fallback.poll_interval),
            max_chunk_size: self.max_chunk_size.or(fallback.max_chunk_size),
            read_size: self.read_size.or(fallback.read_size),
        }
    }

    /// Apply defaults and check the result.
    pub fn resolve(self) -> Result<Settings> {
        let Some(delay) = self.delay else {
            bail!("no delay given; pass --delay or set `delay` in the config file");
        };

        let settings = Settings {
            delay,
            spool: self.spool,
            sync_spool: self.sync_spool.unwrap_or(false),
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            max_chunk_size: self.max_chunk_size.unwrap_or(DEFAULT_MAX_CHUNK_SIZE),
            read_size: self.read_size.unwrap_or(DEFAULT_READ_SIZE),
        };

        if settings.poll_interval.is_zero() {
            bail!("poll_interval must be greater than zero");
        }
        if settings.read_size == 0 {
            bail!("read_size must be greater than zero");
        }
        settings.delay_config().validate()?;

        Ok(settings)
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub delay: Duration,
    pub spool: Option<PathBuf>,
    pub sync_spool: bool,
    pub poll_interval: Duration,
    pub max_chunk_size: usize,
    pub read_size: usize,
}

impl Settings {
    pub fn delay_config(&self) -> DelayConfig {
        DelayConfig {
            delay: self.delay,
            max_chunk_size: self.max_chunk_size,
            ..Default::default()
        }
    }
}

/// Parse a human duration such as `500ms`, `5s`, `2m`, `1h` or `1m30s`.
pub fn parse_duration(literal: &str) -> std::result::Result<Duration, String> {
    let literal = literal.trim();
    if literal.is_empty() {
        return Err("empty duration".to_string());
    }

    let bytes = literal.as_bytes();
    let mut total = Duration::ZERO;
    let mut idx = 0;

    while idx < bytes.len() {
        let start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if start == idx {
            return Err(format!("expected a number in '{}'", literal));
        }
        let value: u64 = literal[start..idx]
            .parse()
            .map_err(|_| format!("number too large in '{}'", literal))?;

        let unit_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        let part = match &literal[unit_start..idx] {
            "ns" => Some(Duration::from_nanos(value)),
            "us" => Some(Duration::from_micros(value)),
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3_600).map(Duration::from_secs),
            "" => return Err(format!("missing unit in '{}' (use ms, s, m or h)", literal)),
            unit => return Err(format!("unknown unit '{}' in '{}'", unit, literal)),
        };

        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("duration '{}' is too long", literal))?;
    }

    Ok(total)
}
