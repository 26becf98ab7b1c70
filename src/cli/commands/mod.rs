//! CLI command implementations

pub mod cat;
pub mod clear;
pub mod completions;
pub mod config;
pub mod fetch;
pub mod gc;
pub mod list;

pub use cat::execute as cat;
pub use clear::execute as clear;
pub use completions::execute as completions;
pub use config::execute as config;
pub use fetch::execute as fetch;
pub use gc::execute as gc;
pub use list::execute as list;

use crate::cache::{
    CacheEntry, FetchState, Fetcher, HttpFetcher, ReaderHandle, StreamCache, StreamFetcher,
};
use crate::cli::args::SourceArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{StreamCacheError, StreamCacheResult};
use std::fs::File;
use std::sync::Arc;
use tracing::debug;

/// "1 entry", "3 entries"
pub(crate) fn entries_label(count: usize) -> String {
    if count == 1 {
        "1 entry".to_string()
    } else {
        format!("{} entries", count)
    }
}

/// Run blocking cache work off the async runtime
pub(crate) async fn blocking<T, F>(task: F) -> StreamCacheResult<T>
where
    F: FnOnce() -> StreamCacheResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StreamCacheError::Internal(format!("blocking task failed: {}", e)))?
}

/// Open the cache configured in `config`
pub(crate) fn open_cache(config: &Config) -> StreamCacheResult<StreamCache> {
    let dir = ConfigManager::cache_dir(config);
    debug!("Opening cache at {}", dir.display());
    StreamCache::open(&dir, config.cache.options())
}

/// Build a fetcher for the given source, if any
pub(crate) fn build_fetcher(
    source: &SourceArgs,
    config: &Config,
) -> StreamCacheResult<Option<Box<dyn Fetcher>>> {
    if let Some(ref url) = source.url {
        let fetcher = HttpFetcher::new(url.clone())
            .with_user_agent(config.fetch.user_agent.clone())
            .with_timeout(config.fetch.timeout())
            .with_chunk_size(config.fetch.chunk_size);
        return Ok(Some(Box::new(fetcher)));
    }

    if let Some(ref path) = source.file {
        let file = File::open(path)
            .map_err(|e| StreamCacheError::io(format!("opening {}", path.display()), e))?;
        let size = file
            .metadata()
            .map_err(|e| StreamCacheError::io(format!("reading metadata of {}", path.display()), e))?
            .len();
        let fetcher = StreamFetcher::new(file)
            .with_expected_size(size)
            .with_chunk_size(config.fetch.chunk_size);
        return Ok(Some(Box::new(fetcher)));
    }

    Ok(None)
}

/// Wait for the entry behind `reader` to finish fetching
///
/// Fails if the fetch stopped early.
pub(crate) fn await_fetch(reader: &ReaderHandle) -> StreamCacheResult<()> {
    let entry = reader.entry();
    match entry.wait_until_finished() {
        FetchState::Failed => Err(StreamCacheError::Fetch(format!(
            "{} stopped after {} bytes",
            entry.identity(),
            entry.frontier()
        ))),
        _ => Ok(()),
    }
}

/// Fetcher for an identity that must already be cached
pub(crate) struct CachedOnly(pub(crate) String);

impl Fetcher for CachedOnly {
    fn start(self: Box<Self>, _entry: Arc<CacheEntry>) -> StreamCacheResult<()> {
        Err(StreamCacheError::User(format!(
            "{} is not cached; pass --url or --file to fetch it",
            self.0
        )))
    }
}
