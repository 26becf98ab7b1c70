//! Fetch command - warm the cache

use super::{await_fetch, blocking, build_fetcher, open_cache};
use crate::cache::{format_bytes, ReaderHandle};
use crate::cli::args::FetchArgs;
use crate::config::Config;
use crate::error::{StreamCacheError, StreamCacheResult};
use crate::ui::{self, FetchProgress, UiContext};

const READ_BUFFER: usize = 64 * 1024;

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> StreamCacheResult<()> {
    let config = config.clone();
    let ctx = UiContext::detect();

    let identity = args.identity.clone();
    let task_ctx = ctx.clone();
    let bytes = blocking(move || {
        let fetcher = build_fetcher(&args.source, &config)?.ok_or_else(|| {
            StreamCacheError::User("pass --url or --file to fetch".to_string())
        })?;

        let cache = open_cache(&config)?;
        let reader = cache.get_stream(&args.identity, fetcher)?;
        let progress = FetchProgress::new(&task_ctx, &args.identity);
        let bytes = drain(&reader, &progress)?;
        await_fetch(&reader)?;
        progress.finish(bytes);
        reader.close()?;
        Ok(bytes)
    })
    .await?;

    ui::step_ok_detail(&ctx, &format!("Cached {}", identity), &format_bytes(bytes));
    Ok(())
}

/// Read `reader` to the end, reporting progress
///
/// Returns once every byte has arrived, which for a fresh entry means the
/// fetch has finished.
fn drain(reader: &ReaderHandle, progress: &FetchProgress) -> StreamCacheResult<u64> {
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let n = reader.read(&mut buffer)?;
        progress.update(reader.position(), reader.entry().expected_size());
        if n == 0 {
            return Ok(reader.position());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, StreamCache, StreamFetcher};
    use std::io::Cursor;

    #[test]
    fn drain_reads_until_fetch_finishes() {
        let cache = StreamCache::in_memory(CacheOptions::default());
        let data = vec![3u8; 200_000];
        let reader = cache
            .get_stream("big", StreamFetcher::new(Cursor::new(data)).with_chunk_size(4096))
            .unwrap();

        let progress = FetchProgress::new(&UiContext::non_interactive(), "big");
        assert_eq!(drain(&reader, &progress).unwrap(), 200_000);
        assert!(reader.entry().is_finished());
    }
}
