//! Checkpoint IO configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default bytes per multipart part (32 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Default number of concurrent part uploads
pub const DEFAULT_MAX_PARALLELISM: usize = 8;

/// Default root of the local filesystem store
pub const DEFAULT_LOCAL_ROOT: &str = "./checkpoints";

/// Main checkpoint IO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Bytes per multipart part
    pub chunk_size: u64,

    /// Maximum number of part uploads in flight at once
    pub max_parallelism: usize,

    /// Use multipart uploads for large payloads
    pub multipart_enabled: bool,

    /// Payloads smaller than this are written with a single put
    pub min_multipart_size: u64,

    /// Per-part retry policy
    pub retry: RetryConfig,

    /// Object store to build when no client is supplied
    pub store: StoreConfig,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            multipart_enabled: true,
            min_multipart_size: DEFAULT_CHUNK_SIZE,
            retry: RetryConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl CheckpointConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the upload engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig {
                message: "chunk_size must be greater than zero".to_string(),
            });
        }
        if self.max_parallelism == 0 {
            return Err(Error::InvalidConfig {
                message: "max_parallelism must be greater than zero".to_string(),
            });
        }
        self.retry.validate()
    }

    /// Whether a payload of `size` bytes goes through the multipart path
    pub fn use_multipart(&self, size: u64) -> bool {
        self.multipart_enabled && size >= self.min_multipart_size
    }
}

/// Retry configuration for a single part upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per part, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "millis_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "millis_serde")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Object store backend selection
///
/// Defaults to a local store under [`DEFAULT_LOCAL_ROOT`]; the in-memory
/// store has to be asked for explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local in-memory store; contents are lost on exit
    Memory,

    /// Local filesystem; each bucket is a directory under `root`
    Local { root: PathBuf },

    /// S3-compatible storage
    S3 {
        region: String,
        endpoint: Option<String>,
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Local {
            root: PathBuf::from(DEFAULT_LOCAL_ROOT),
        }
    }
}

impl StoreConfig {
    /// Whether saved checkpoints outlive the process
    pub fn is_persistent(&self) -> bool {
        !matches!(self, StoreConfig::Memory)
    }
}

/// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
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
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
