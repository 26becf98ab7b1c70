//! Error types for streamcache
//!
//! All modules use `StreamCacheResult<T>` as their return type.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for streamcache operations
pub type StreamCacheResult<T> = Result<T, StreamCacheError>;

/// All errors that can occur in streamcache
#[derive(Error, Debug)]
pub enum StreamCacheError {
    // Availability errors
    #[error("Offset {offset} will never become readable (fetch stopped at {frontier} bytes)")]
    NeverAvailable { offset: u64, frontier: u64 },

    #[error("Timed out waiting for offset {offset} (fetched {frontier} bytes so far)")]
    WaitTimedOut { offset: u64, frontier: u64 },

    // Reader errors
    #[error("Stream already closed")]
    AlreadyClosed,

    #[error("Invalid seek to negative or overflowing position {0}")]
    InvalidSeek(i128),

    // Fetch lifecycle errors
    #[error("A fetch was already started for {0}")]
    DuplicateFetchAttempt(String),

    #[error("Fetch for {0} already finished")]
    FetchFinished(String),

    #[error("Conflicting size for {identity}: already {current}, got {requested}")]
    SizeConflict {
        identity: String,
        current: u64,
        requested: u64,
    },

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // Storage errors
    #[error(transparent)]
    Storage(io::Error),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StreamCacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an error raised by a backing store
    pub fn storage(source: io::Error) -> Self {
        Self::Storage(source)
    }

    /// Check if error is retryable
    ///
    /// A failed fetch can be retried by removing the entry and requesting the
    /// stream again with a fresh fetcher.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NeverAvailable { .. } | Self::WaitTimedOut { .. } | Self::Http(_) | Self::Fetch(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NeverAvailable { .. } => {
                Some("The fetch stopped early. Run the command again to fetch it anew")
            }
            Self::WaitTimedOut { .. } => Some("Increase cache.read_timeout_secs or set it to 0"),
            Self::ConfigInvalid { .. } => Some("Run: streamcache config init --force"),
            _ => None,
        }
    }
}

impl From<StreamCacheError> for io::Error {
    fn from(err: StreamCacheError) -> Self {
        match err {
            StreamCacheError::Storage(source) => source,
            StreamCacheError::Io { source, .. } => source,
            StreamCacheError::NeverAvailable { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            StreamCacheError::WaitTimedOut { .. } => io::Error::new(io::ErrorKind::TimedOut, err),
            StreamCacheError::AlreadyClosed => io::Error::new(io::ErrorKind::BrokenPipe, err),
            StreamCacheError::InvalidSeek(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            other => io::Error::other(other),
        }
    }
}
