//! Delay Buffer Configuration
//!
//! - **delay**: how long each chunk is held before it may be read (serialized as milliseconds)
//! - **max_chunk_size**: largest payload accepted by `write` and by the decoder (default: 64MB)
//! - **head_shrink_threshold**: once the released-bytes buffer is fully drained, backing storage
//!   larger than this is released (default: 1MB)
//!
//! ## Usage
//!
//! ```
//! use std::time::Duration;
//! use timeshift_core::DelayConfig;
//!
//! let config = DelayConfig {
//!     delay: Duration::from_secs(30),
//!     ..Default::default()
//! };
//! config.validate().unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::chunk::{DEFAULT_MAX_CHUNK_SIZE, MAX_CHUNK_LIMIT};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Time each chunk is held before release
    #[serde(rename = "delay_ms", with = "duration_ms")]
    pub delay: Duration,

    /// Largest accepted chunk payload in bytes (default: 64MB)
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Capacity above which a drained head buffer is reallocated (default: 1MB)
    #[serde(default = "default_head_shrink_threshold")]
    pub head_shrink_threshold: usize,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            max_chunk_size: default_max_chunk_size(),
            head_shrink_threshold: default_head_shrink_threshold(),
        }
    }
}

impl DelayConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Reject settings the chunk format cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.max_chunk_size > MAX_CHUNK_LIMIT {
            return Err(Error::InvalidConfig(format!(
                "max_chunk_size {} exceeds the frame size limit {}",
                self.max_chunk_size, MAX_CHUNK_LIMIT
            )));
        }
        Ok(())
    }
}

fn default_max_chunk_size() -> usize {
    DEFAULT_MAX_CHUNK_SIZE
}

fn default_head_shrink_threshold() -> usize {
    1024 * 1024 // 1MB
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
