//! streamcache - Cache for partially available streams
//!
//! Lets readers consume a resource while it is still being fetched,
//! blocking only for bytes that have not arrived yet.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod ui;

pub use cache::{CacheEntry, Fetcher, ReaderHandle, StreamCache};
pub use error::{StreamCacheError, StreamCacheResult};
