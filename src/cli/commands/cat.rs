//! Cat command - stream a resource to stdout

use super::{await_fetch, blocking, build_fetcher, open_cache, CachedOnly};
use crate::cache::{Fetcher, ReaderHandle};
use crate::cli::args::CatArgs;
use crate::config::Config;
use crate::error::{StreamCacheError, StreamCacheResult};
use std::io::{self, SeekFrom, Write};
use tracing::debug;

const READ_BUFFER: usize = 64 * 1024;

/// Execute the cat command
pub async fn execute(args: CatArgs, config: &Config) -> StreamCacheResult<()> {
    let config = config.clone();

    blocking(move || {
        let fetcher: Box<dyn Fetcher> = match build_fetcher(&args.source, &config)? {
            Some(fetcher) => fetcher,
            None => Box::new(CachedOnly(args.identity.clone())),
        };

        let cache = open_cache(&config)?;
        let reader = cache.get_stream(&args.identity, fetcher)?;
        if args.offset > 0 {
            reader.seek(SeekFrom::Start(args.offset))?;
        }

        let stdout = io::stdout();
        let mut out = stdout.lock();
        let written = copy_to(&reader, &mut out)?;
        debug!("Wrote {} bytes of {}", written, args.identity);
        await_fetch(&reader)?;
        reader.close()
    })
    .await
}

/// Copy from the cursor to the end of the resource into `out`
///
/// A closed pipe on the output side ends the copy quietly.
fn copy_to<W: Write>(reader: &ReaderHandle, out: &mut W) -> StreamCacheResult<u64> {
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut written = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }

        match out.write_all(&buffer[..n]) {
            Ok(()) => written += n as u64,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(written),
            Err(e) => return Err(StreamCacheError::io("writing to stdout", e)),
        }
    }

    match out.flush() {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
            Err(StreamCacheError::io("flushing stdout", e))
        }
        _ => Ok(written),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, StreamCache, StreamFetcher};
    use std::io::Cursor;

    #[test]
    fn copies_from_offset_to_end() {
        let cache = StreamCache::in_memory(CacheOptions::default());
        let reader = cache
            .get_stream(
                "greeting",
                StreamFetcher::new(Cursor::new(b"hello, world".to_vec())).with_expected_size(12),
            )
            .unwrap();
        reader.seek(SeekFrom::Start(7)).unwrap();

        let mut out = Vec::new();
        assert_eq!(copy_to(&reader, &mut out).unwrap(), 5);
        assert_eq!(out, b"world");
    }

    #[test]
    fn uncached_identity_without_source_fails() {
        let cache = StreamCache::in_memory(CacheOptions::default());
        let err = cache
            .get_stream("missing", CachedOnly("missing".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("not cached"));
        assert!(!cache.contains("missing"));
    }
}
