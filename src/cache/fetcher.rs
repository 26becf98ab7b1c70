//! Fetchers populate cache entries in the background
//!
//! A [`Fetcher`] is started once per newly created entry. It writes bytes
//! into the entry's store, advances the frontier as they land, and calls
//! [`CacheEntry::mark_finished`] exactly once when it stops.

use crate::cache::entry::CacheEntry;
use crate::error::{StreamCacheError, StreamCacheResult};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Default read size for copying from a source
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Producer of an entry's bytes
pub trait Fetcher: Send {
    /// Total size of the resource, if known before fetching starts
    fn expected_size(&self) -> Option<u64> {
        None
    }

    /// Begin populating `entry`
    ///
    /// Must return promptly; the actual transfer runs on its own thread.
    fn start(self: Box<Self>, entry: Arc<CacheEntry>) -> StreamCacheResult<()>;
}

impl Fetcher for Box<dyn Fetcher> {
    fn expected_size(&self) -> Option<u64> {
        (**self).expected_size()
    }

    fn start(self: Box<Self>, entry: Arc<CacheEntry>) -> StreamCacheResult<()> {
        let inner: Box<dyn Fetcher> = *self;
        inner.start(entry)
    }
}

/// `Write` adapter appending to an entry's store and advancing its frontier
pub struct EntryWriter {
    entry: Arc<CacheEntry>,
    offset: u64,
}

impl EntryWriter {
    /// Start writing at the entry's current frontier
    pub fn new(entry: Arc<CacheEntry>) -> Self {
        let offset = entry.frontier();
        Self { entry, offset }
    }

    /// Bytes written so far (the frontier this writer has published)
    pub fn written(&self) -> u64 {
        self.offset
    }
}

impl Write for EntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(size) = self.entry.expected_size() {
            let end = self.offset.saturating_add(buf.len() as u64);
            if end > size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "source for {} runs past its expected size of {} bytes",
                        self.entry.identity(),
                        size
                    ),
                ));
            }
        }

        let n = self.entry.store().write_at(self.offset, buf)?;
        self.offset += n as u64;
        self.entry.advance_frontier(self.offset)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.entry.store().sync()
    }
}

/// Marks the entry failed if the fetch thread exits without finishing it
struct FinishGuard(Arc<CacheEntry>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if !self.0.is_finished() {
            warn!("Fetch for {} ended unexpectedly", self.0.identity());
            self.0.mark_finished(false);
        }
    }
}

/// Copy `source` into `entry` in `chunk_size` pieces
///
/// Preallocates the store when the total size is known. Does not finish the
/// entry.
pub fn copy_into_entry<R: Read>(
    entry: &Arc<CacheEntry>,
    source: &mut R,
    chunk_size: usize,
) -> io::Result<u64> {
    if let Some(size) = entry.expected_size() {
        entry.store().set_len(size)?;
    }

    let mut writer = EntryWriter::new(Arc::clone(entry));
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
    }

    writer.flush()?;
    Ok(writer.written())
}

fn spawn_fetch<F>(entry: Arc<CacheEntry>, task: F) -> StreamCacheResult<()>
where
    F: FnOnce(&Arc<CacheEntry>) -> StreamCacheResult<u64> + Send + 'static,
{
    thread::Builder::new()
        .name("streamcache-fetch".to_string())
        .spawn(move || {
            let guard = FinishGuard(entry);
            let entry = &guard.0;
            match task(entry) {
                Ok(bytes) => {
                    debug!("Fetched {} bytes for {}", bytes, entry.identity());
                    entry.mark_finished(true);
                }
                Err(e) => {
                    warn!("Fetch for {} failed: {}", entry.identity(), e);
                    entry.mark_finished(false);
                }
            }
        })
        .map_err(|e| StreamCacheError::io("spawning fetch thread", e))?;
    Ok(())
}

/// Fetcher copying from any blocking reader
pub struct StreamFetcher<R> {
    source: R,
    expected_size: Option<u64>,
    chunk_size: usize,
}

impl<R: Read + Send + 'static> StreamFetcher<R> {
    /// Fetch everything `source` yields
    pub fn new(source: R) -> Self {
        Self {
            source,
            expected_size: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Announce the total size up front
    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Read from the source in pieces of `chunk_size`
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

impl<R: Read + Send + 'static> Fetcher for StreamFetcher<R> {
    fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    fn start(self: Box<Self>, entry: Arc<CacheEntry>) -> StreamCacheResult<()> {
        let StreamFetcher {
            mut source,
            chunk_size,
            ..
        } = *self;

        spawn_fetch(entry, move |entry| {
            copy_into_entry(entry, &mut source, chunk_size).map_err(StreamCacheError::storage)
        })
    }
}

/// Fetcher downloading a URL with a blocking HTTP GET
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    url: String,
    user_agent: String,
    timeout: Option<Duration>,
    chunk_size: usize,
}

impl HttpFetcher {
    /// Fetch `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: format!("streamcache/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Send this `User-Agent`
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Abort the whole transfer after `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the body in pieces of `chunk_size`
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn download(&self, entry: &Arc<CacheEntry>) -> StreamCacheResult<u64> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(self.timeout)
            .build()
            .into();

        let response = agent
            .get(&self.url)
            .header("User-Agent", self.user_agent.as_str())
            .call()
            .map_err(|e| StreamCacheError::Http(format!("{}: {}", self.url, e)))?;

        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(len) = content_length {
            entry.set_expected_size(len)?;
        }

        let mut body = response.into_body().into_reader();
        copy_into_entry(entry, &mut body, self.chunk_size).map_err(StreamCacheError::storage)
    }
}

impl Fetcher for HttpFetcher {
    fn start(self: Box<Self>, entry: Arc<CacheEntry>) -> StreamCacheResult<()> {
        debug!("Downloading {} into {}", self.url, entry.identity());
        spawn_fetch(entry, move |entry| self.download(entry))
    }
}
