//! Per-consumer cursors over a cached entry
//!
//! A [`ReaderHandle`] reads an entry while it is still being fetched. Reads
//! and seeks block until the bytes they need have arrived, or fail once the
//! fetch is known to have stopped short.

use crate::cache::entry::{CacheEntry, FetchState, ReaderId};
use crate::cache::store::BackingStore;
use crate::error::{StreamCacheError, StreamCacheResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long a read waits before returning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    /// Return as soon as at least one byte past the cursor is readable
    #[default]
    Available,
    /// Wait for the whole buffer (or the end of the fetch), then return
    Fill,
}

/// Behaviour shared by all readers a cache hands out
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    pub policy: ReadPolicy,
    /// Give up waiting after this long; `None` waits until the fetch ends
    pub timeout: Option<Duration>,
}

struct Cursor {
    position: u64,
    /// Dropped on close
    store: Option<Arc<dyn BackingStore>>,
}

/// Single-cursor reader over one cache entry
///
/// The handle registers with its entry on creation and unregisters on
/// [`close`](Self::close) or drop, whichever comes first.
pub struct ReaderHandle {
    id: ReaderId,
    entry: Arc<CacheEntry>,
    cursor: Mutex<Cursor>,
    options: ReaderOptions,
}

impl ReaderHandle {
    /// Open a reader on `entry`
    pub fn new(entry: Arc<CacheEntry>, options: ReaderOptions) -> Self {
        let id = ReaderId::new();
        entry.register_reader(id);
        debug!("Opened reader {} on {}", id, entry.identity());

        let store = Arc::clone(entry.store());
        Self {
            id,
            entry,
            cursor: Mutex::new(Cursor {
                position: 0,
                store: Some(store),
            }),
            options,
        }
    }

    /// Reader token registered with the entry
    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// Identity of the entry being read
    pub fn identity(&self) -> &str {
        self.entry.identity()
    }

    /// Entry being read
    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    /// Current cursor position
    pub fn position(&self) -> u64 {
        self.cursor.lock().position
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.cursor.lock().store.is_none()
    }

    fn open_position(&self) -> StreamCacheResult<u64> {
        let cursor = self.cursor.lock();
        if cursor.store.is_none() {
            return Err(StreamCacheError::AlreadyClosed);
        }
        Ok(cursor.position)
    }

    fn wait(&self, target: u64) -> StreamCacheResult<u64> {
        match self.options.timeout {
            Some(timeout) => self.entry.wait_until_fetchable_timeout(target, timeout),
            None => self.entry.wait_until_fetchable(target),
        }
    }

    /// Read into `buf` at the cursor
    ///
    /// Blocks until bytes past the cursor are readable, then returns what is
    /// available, which may be less than `buf.len()`. Returns `Ok(0)` at the
    /// end of a completely fetched resource.
    pub fn read(&self, buf: &mut [u8]) -> StreamCacheResult<usize> {
        let position = self.open_position()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let expected = self.entry.expected_size();
        if expected.is_some_and(|size| position >= size) {
            return Ok(0);
        }

        let wanted = match self.options.policy {
            ReadPolicy::Available => 1,
            ReadPolicy::Fill => buf.len() as u64,
        };
        let mut target = position.saturating_add(wanted);
        if let Some(size) = expected {
            target = target.min(size);
        }

        // Waiting happens without the cursor lock so close() stays responsive
        let frontier = match self.wait(target) {
            Ok(frontier) => frontier,
            Err(StreamCacheError::NeverAvailable { frontier, .. }) if frontier > position => {
                frontier
            }
            Err(StreamCacheError::NeverAvailable { .. })
                if self.entry.fetch_state() == FetchState::Complete =>
            {
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let mut cursor = self.cursor.lock();
        let position = cursor.position;
        let Some(ref store) = cursor.store else {
            return Err(StreamCacheError::AlreadyClosed);
        };

        let available = frontier.saturating_sub(position);
        let len = usize::try_from(available).map_or(buf.len(), |a| a.min(buf.len()));
        if len == 0 {
            return Ok(0);
        }

        let n = store
            .read_at(position, &mut buf[..len])
            .map_err(StreamCacheError::storage)?;
        if n == 0 {
            return Err(StreamCacheError::storage(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "store is shorter than the fetched frontier",
            )));
        }

        cursor.position = position + n as u64;
        Ok(n)
    }

    /// Move the cursor
    ///
    /// Blocks until the target offset is readable. End-relative seeks wait
    /// for the total size to be known. The cursor never moves past what has
    /// actually arrived.
    pub fn seek(&self, pos: SeekFrom) -> StreamCacheResult<u64> {
        let current = self.open_position()?;

        let target: i128 = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(current) + i128::from(delta),
            SeekFrom::End(delta) => {
                let size = self
                    .entry
                    .wait_for_expected_size()
                    .unwrap_or_else(|| self.entry.frontier());
                i128::from(size) + i128::from(delta)
            }
        };
        let target = u64::try_from(target).map_err(|_| StreamCacheError::InvalidSeek(target))?;

        let frontier = self.wait(target)?;
        let new_position = target.min(frontier);

        let mut cursor = self.cursor.lock();
        if cursor.store.is_none() {
            return Err(StreamCacheError::AlreadyClosed);
        }
        cursor.position = new_position;
        Ok(new_position)
    }

    /// Rewind to the start without checking availability
    pub fn reset(&self) {
        self.cursor.lock().position = 0;
    }

    /// Whether the cursor sits at the end of the resource
    pub fn is_at_end(&self) -> bool {
        let position = self.cursor.lock().position;
        match self.entry.expected_size() {
            Some(size) => position >= size,
            None => self.entry.is_finished() && position >= self.entry.frontier(),
        }
    }

    /// Release the reader
    ///
    /// Only the first call unregisters from the entry; later calls succeed
    /// without doing anything.
    pub fn close(&self) -> StreamCacheResult<()> {
        let released = self.cursor.lock().store.take();
        if released.is_some() {
            self.entry.unregister_reader(self.id);
            debug!("Closed reader {} on {}", self.id, self.entry.identity());
        }
        Ok(())
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl Read for ReaderHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ReaderHandle::read(self, buf).map_err(Into::into)
    }
}

impl Seek for ReaderHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        ReaderHandle::seek(self, pos).map_err(Into::into)
    }
}

impl fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderHandle")
            .field("id", &self.id)
            .field("identity", &self.entry.identity())
            .field("position", &self.position())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use std::thread;

    /// Entry whose store already holds `data` but whose frontier starts at 0
    fn fetching_entry(data: &[u8], expected: Option<u64>) -> Arc<CacheEntry> {
        let store = Arc::new(MemoryStore::with_data(data.to_vec()));
        let entry = CacheEntry::new("reader-test", store, expected);
        entry.begin_fetch().unwrap();
        Arc::new(entry)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn first_read_returns_exactly_the_first_advance() {
        let data = payload(1000);
        let entry = fetching_entry(&data, Some(1000));
        let reader = ReaderHandle::new(Arc::clone(&entry), ReaderOptions::default());

        let fetcher = {
            let entry = Arc::clone(&entry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                entry.advance_frontier(300).unwrap();
                thread::sleep(Duration::from_millis(30));
                entry.advance_frontier(700).unwrap();
                entry.advance_frontier(1000).unwrap();
                entry.mark_finished(true);
            })
        };

        let mut buf = vec![0u8; 1000];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 300);
        assert_eq!(&buf[..300], &data[..300]);
        assert_eq!(reader.position(), 300);

        fetcher.join().unwrap();
    }

    #[test]
    fn fill_policy_waits_for_whole_buffer() {
        let data = payload(1000);
        let entry = fetching_entry(&data, Some(1000));
        let options = ReaderOptions {
            policy: ReadPolicy::Fill,
            timeout: None,
        };
        let reader = ReaderHandle::new(Arc::clone(&entry), options);

        let fetcher = {
            let entry = Arc::clone(&entry);
            thread::spawn(move || {
                for frontier in [300, 700, 1000] {
                    thread::sleep(Duration::from_millis(10));
                    entry.advance_frontier(frontier).unwrap();
                }
                entry.mark_finished(true);
            })
        };

        let mut buf = vec![0u8; 1000];
        assert_eq!(reader.read(&mut buf).unwrap(), 1000);
        assert_eq!(buf, data);
        fetcher.join().unwrap();
    }

    #[test]
    fn short_read_is_frontier_minus_position() {
        let data = payload(100);
        let entry = fetching_entry(&data, Some(100));
        entry.advance_frontier(40).unwrap();
        let reader = ReaderHandle::new(Arc::clone(&entry), ReaderOptions::default());

        let mut buf = [0u8; 30];
        assert_eq!(reader.read(&mut buf).unwrap(), 30);
        assert_eq!(reader.read(&mut buf).unwrap(), 10);
        assert_eq!(reader.position(), 40);
    }

    #[test]
    fn read_at_end_of_complete_entry_returns_zero() {
        let data = payload(10);
        let entry = fetching_entry(&data, None);
        entry.advance_frontier(10).unwrap();
        entry.mark_finished(true);

        let mut reader = ReaderHandle::new(entry, ReaderOptions::default());
        let mut out = vec![];
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert!(reader.is_at_end());
    }

    #[test]
    fn failed_fetch_serves_prefix_then_errors() {
        let data = payload(100);
        let entry = fetching_entry(&data, Some(100));
        entry.advance_frontier(25).unwrap();
        entry.mark_finished(false);

        let reader = ReaderHandle::new(entry, ReaderOptions::default());
        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf).unwrap(), 25);
        assert!(matches!(
            reader.read(&mut buf),
            Err(StreamCacheError::NeverAvailable { frontier: 25, .. })
        ));
    }

    #[test]
    fn seek_blocks_until_target_arrives() {
        let data = payload(500);
        let entry = fetching_entry(&data, Some(500));
        let reader = ReaderHandle::new(Arc::clone(&entry), ReaderOptions::default());

        let fetcher = {
            let entry = Arc::clone(&entry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                entry.advance_frontier(450).unwrap();
            })
        };

        assert_eq!(reader.seek(SeekFrom::Start(400)).unwrap(), 400);
        assert!(reader.position() <= entry.frontier());
        assert_eq!(reader.seek(SeekFrom::Current(-100)).unwrap(), 300);
        fetcher.join().unwrap();
    }

    #[test]
    fn seek_past_failed_fetch_is_never_available() {
        let entry = fetching_entry(&payload(50), Some(50));
        entry.advance_frontier(10).unwrap();
        entry.mark_finished(false);

        let reader = ReaderHandle::new(entry, ReaderOptions::default());
        assert!(matches!(
            reader.seek(SeekFrom::Start(20)),
            Err(StreamCacheError::NeverAvailable { .. })
        ));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn seek_from_end_uses_expected_size() {
        let entry = fetching_entry(&payload(64), Some(64));
        entry.advance_frontier(64).unwrap();
        let reader = ReaderHandle::new(entry, ReaderOptions::default());

        assert_eq!(reader.seek(SeekFrom::End(-4)).unwrap(), 60);
        assert!(matches!(
            reader.seek(SeekFrom::Current(-100)),
            Err(StreamCacheError::InvalidSeek(-40))
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let entry = fetching_entry(&payload(8), Some(8));
        let reader = ReaderHandle::new(Arc::clone(&entry), ReaderOptions::default());
        let other = ReaderHandle::new(Arc::clone(&entry), ReaderOptions::default());
        assert_eq!(entry.reader_count(), 2);

        reader.close().unwrap();
        reader.close().unwrap();
        assert_eq!(entry.reader_count(), 1);

        let mut buf = [0u8; 4];
        assert!(matches!(
            reader.read(&mut buf),
            Err(StreamCacheError::AlreadyClosed)
        ));
        assert!(matches!(
            reader.seek(SeekFrom::Start(0)),
            Err(StreamCacheError::AlreadyClosed)
        ));

        drop(other);
        assert_eq!(entry.reader_count(), 0);
    }

    #[test]
    fn reset_rewinds_without_waiting() {
        let data = payload(20);
        let entry = fetching_entry(&data, Some(20));
        entry.advance_frontier(20).unwrap();
        let reader = ReaderHandle::new(entry, ReaderOptions::default());

        let mut buf = [0u8; 20];
        reader.read(&mut buf).unwrap();
        assert!(reader.is_at_end());

        reader.reset();
        assert_eq!(reader.position(), 0);
        assert!(!reader.is_at_end());
    }

    #[test]
    fn readers_keep_independent_cursors() {
        let data = payload(100);
        let entry = fetching_entry(&data, Some(100));
        entry.advance_frontier(100).unwrap();

        let a = ReaderHandle::new(Arc::clone(&entry), ReaderOptions::default());
        let b = ReaderHandle::new(Arc::clone(&entry), ReaderOptions::default());

        let mut buf = [0u8; 60];
        a.read(&mut buf).unwrap();
        b.seek(SeekFrom::Start(90)).unwrap();

        assert_eq!(a.position(), 60);
        assert_eq!(b.position(), 90);
    }

    #[test]
    fn timeout_surfaces_from_read() {
        let entry = fetching_entry(&payload(10), Some(10));
        let options = ReaderOptions {
            policy: ReadPolicy::Available,
            timeout: Some(Duration::from_millis(10)),
        };
        let reader = ReaderHandle::new(entry, options);

        let mut buf = [0u8; 4];
        assert!(matches!(
            reader.read(&mut buf),
            Err(StreamCacheError::WaitTimedOut { .. })
        ));
    }

    #[test]
    fn unbounded_timeout_reads_and_seeks() {
        let data = payload(10);
        let entry = fetching_entry(&data, Some(10));
        entry.advance_frontier(6).unwrap();
        let options = ReaderOptions {
            policy: ReadPolicy::Available,
            timeout: Some(Duration::from_secs(i64::MAX as u64)),
        };
        let reader = ReaderHandle::new(entry, options);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, &data[..4]);
        assert_eq!(reader.seek(SeekFrom::Start(6)).unwrap(), 6);
    }
}
