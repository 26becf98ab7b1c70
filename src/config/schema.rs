//! Configuration schema for streamcache
//!
//! Configuration is stored at `~/.config/streamcache/config.toml`

use crate::cache::{mb_to_bytes, CacheOptions, ReadPolicy, ReaderOptions, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache settings
    pub cache: CacheConfig,

    /// Fetch settings
    pub fetch: FetchConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (defaults to the platform cache dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Maximum total cache size in MB (0 = unbounded)
    pub max_size_mb: u64,

    /// When reads return: "available" or "fill"
    pub read_policy: ReadPolicy,

    /// Give up waiting for bytes after N seconds (0 = wait forever)
    pub read_timeout_secs: u64,

    /// Entries untouched for N days are removed by gc (0 = disabled)
    pub gc_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_size_mb: 1024,
            read_policy: ReadPolicy::Available,
            read_timeout_secs: 0,
            gc_days: 30,
        }
    }
}

impl CacheConfig {
    /// Options for opening a [`StreamCache`](crate::cache::StreamCache)
    pub fn options(&self) -> CacheOptions {
        CacheOptions {
            max_size: mb_to_bytes(self.max_size_mb),
            reader: ReaderOptions {
                policy: self.read_policy,
                timeout: (self.read_timeout_secs > 0)
                    .then(|| Duration::from_secs(self.read_timeout_secs)),
            },
        }
    }
}

/// Fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Bytes read from the source per write into the cache
    pub chunk_size: usize,

    /// User-Agent header for HTTP fetches
    pub user_agent: String,

    /// Abort HTTP transfers after N seconds (0 = no limit)
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            user_agent: format!("streamcache/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 300,
        }
    }
}

impl FetchConfig {
    /// Transfer timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}
