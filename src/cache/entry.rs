//! Cached entry state and fetch-progress signalling
//!
//! A [`CacheEntry`] tracks how many contiguous bytes of one resource are
//! safely readable (the *frontier*) and lets readers block until a given
//! offset becomes readable or the fetch is known to have stopped short of it.
//!
//! All mutable state sits behind one mutex paired with a condition variable.
//! The lock is only held for state transitions; store I/O always happens
//! outside of it.

use crate::cache::store::BackingStore;
use crate::error::{StreamCacheError, StreamCacheResult};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Token identifying one open reader of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(Uuid);

impl ReaderId {
    /// Generate a fresh reader token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReaderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an entry is in its fetch lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    /// Created, no fetcher started yet
    Pending,
    /// A fetcher is writing
    Fetching,
    /// Fetch finished and every byte arrived
    Complete,
    /// Fetch stopped before the end
    Failed,
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fetching => write!(f, "fetching"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug)]
struct EntryState {
    expected_size: Option<u64>,
    frontier: u64,
    fetch: FetchState,
    readers: HashSet<ReaderId>,
    last_touched: DateTime<Utc>,
    /// Set by the one `mark_finished` call allowed to commit
    finishing: bool,
}

impl EntryState {
    fn is_finished(&self) -> bool {
        matches!(self.fetch, FetchState::Complete | FetchState::Failed)
    }

    /// Resolve a wait for `target`, or `None` if the caller must keep waiting
    fn resolve(&self, target: u64) -> Option<StreamCacheResult<u64>> {
        if self.frontier >= target {
            return Some(Ok(self.frontier));
        }

        let beyond_end = self.expected_size.is_some_and(|size| target > size);
        if beyond_end || self.is_finished() {
            return Some(Err(StreamCacheError::NeverAvailable {
                offset: target,
                frontier: self.frontier,
            }));
        }

        None
    }
}

/// One cached resource: its store, fetch progress and registered readers
pub struct CacheEntry {
    identity: String,
    store: Arc<dyn BackingStore>,
    state: Mutex<EntryState>,
    fetched: Condvar,
}

impl CacheEntry {
    /// Create an entry that still has to be fetched
    pub fn new(
        identity: impl Into<String>,
        store: Arc<dyn BackingStore>,
        expected_size: Option<u64>,
    ) -> Self {
        Self {
            identity: identity.into(),
            store,
            state: Mutex::new(EntryState {
                expected_size,
                frontier: 0,
                fetch: FetchState::Pending,
                readers: HashSet::new(),
                last_touched: Utc::now(),
                finishing: false,
            }),
            fetched: Condvar::new(),
        }
    }

    /// Create an entry whose content is already fully stored
    pub fn completed(
        identity: impl Into<String>,
        store: Arc<dyn BackingStore>,
        size: u64,
        last_touched: DateTime<Utc>,
    ) -> Self {
        let entry = Self::new(identity, store, Some(size));
        {
            let mut state = entry.state.lock();
            state.frontier = size;
            state.fetch = FetchState::Complete;
            state.last_touched = last_touched;
        }
        entry
    }

    /// Identity the entry is cached under
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Backing store holding the entry's bytes
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Total size of the resource, once known
    pub fn expected_size(&self) -> Option<u64> {
        self.state.lock().expected_size
    }

    /// Contiguous bytes readable from offset 0
    pub fn frontier(&self) -> u64 {
        self.state.lock().frontier
    }

    /// Current fetch lifecycle state
    pub fn fetch_state(&self) -> FetchState {
        self.state.lock().fetch
    }

    /// Whether the fetch completed or failed
    pub fn is_finished(&self) -> bool {
        self.state.lock().is_finished()
    }

    /// Whether the fetch stopped before the end
    pub fn is_failed(&self) -> bool {
        self.state.lock().fetch == FetchState::Failed
    }

    /// Whether a fetcher is currently writing
    pub fn is_active(&self) -> bool {
        self.state.lock().fetch == FetchState::Fetching
    }

    /// Number of open readers
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    /// Whether the entry may be evicted or removed right now
    pub fn is_removable(&self) -> bool {
        let state = self.state.lock();
        state.fetch != FetchState::Fetching && state.readers.is_empty()
    }

    /// Bytes this entry accounts for against the cache budget
    ///
    /// Uses the expected size when known, else what has arrived so far.
    pub fn tracked_size(&self) -> u64 {
        let state = self.state.lock();
        match state.fetch {
            FetchState::Failed => state.frontier,
            _ => state.expected_size.unwrap_or(state.frontier),
        }
    }

    /// Last time the entry was requested or read
    ///
    /// An entry with open readers counts as touched now.
    pub fn last_touched(&self) -> DateTime<Utc> {
        let mut state = self.state.lock();
        if !state.readers.is_empty() {
            state.last_touched = Utc::now();
        }
        state.last_touched
    }

    /// Mark the entry as used now
    pub fn touch(&self) {
        self.state.lock().last_touched = Utc::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_touched(&self, at: DateTime<Utc>) {
        self.state.lock().last_touched = at;
    }

    /// Reserve the entry for a fetcher
    ///
    /// Only one fetch may ever run per entry.
    pub fn begin_fetch(&self) -> StreamCacheResult<()> {
        let mut state = self.state.lock();
        if state.fetch != FetchState::Pending {
            return Err(StreamCacheError::DuplicateFetchAttempt(
                self.identity.clone(),
            ));
        }
        state.fetch = FetchState::Fetching;
        debug!("Fetch started for {}", self.identity);
        Ok(())
    }

    /// Record the total size once the fetcher learns it
    pub fn set_expected_size(&self, size: u64) -> StreamCacheResult<()> {
        let mut state = self.state.lock();
        match state.expected_size {
            Some(current) if current == size => return Ok(()),
            Some(current) => {
                return Err(StreamCacheError::SizeConflict {
                    identity: self.identity.clone(),
                    current,
                    requested: size,
                })
            }
            None => {}
        }

        if size < state.frontier {
            return Err(StreamCacheError::SizeConflict {
                identity: self.identity.clone(),
                current: state.frontier,
                requested: size,
            });
        }

        state.expected_size = Some(size);
        drop(state);

        // Waiters past the new end can now fail instead of sleeping
        self.fetched.notify_all();
        Ok(())
    }

    /// Block until `target` bytes are readable
    ///
    /// Returns the frontier observed on success. Fails with
    /// [`StreamCacheError::NeverAvailable`] once the fetch has finished below
    /// `target`, or immediately if `target` lies past the known end.
    pub fn wait_until_fetchable(&self, target: u64) -> StreamCacheResult<u64> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.resolve(target) {
                return result;
            }
            self.fetched.wait(&mut state);
        }
    }

    /// Like [`wait_until_fetchable`](Self::wait_until_fetchable), giving up
    /// after `timeout`
    pub fn wait_until_fetchable_timeout(
        &self,
        target: u64,
        timeout: Duration,
    ) -> StreamCacheResult<u64> {
        // A timeout too large for the clock means wait forever
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait_until_fetchable(target);
        };
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.resolve(target) {
                return result;
            }
            if self.fetched.wait_until(&mut state, deadline).timed_out() {
                return state.resolve(target).unwrap_or(Err(
                    StreamCacheError::WaitTimedOut {
                        offset: target,
                        frontier: state.frontier,
                    },
                ));
            }
        }
    }

    /// Block until the total size is known or the fetch finished
    pub fn wait_for_expected_size(&self) -> Option<u64> {
        let mut state = self.state.lock();
        while state.expected_size.is_none() && !state.is_finished() {
            self.fetched.wait(&mut state);
        }
        state.expected_size
    }

    /// Block until the fetch completed or failed
    ///
    /// A successful fetch is committed to its store by the time this returns.
    pub fn wait_until_finished(&self) -> FetchState {
        let mut state = self.state.lock();
        while !state.is_finished() {
            self.fetched.wait(&mut state);
        }
        state.fetch
    }

    /// Move the frontier forward and wake blocked readers
    ///
    /// The frontier never moves backwards and never passes the expected size.
    pub fn advance_frontier(&self, new_frontier: u64) -> StreamCacheResult<u64> {
        let mut state = self.state.lock();
        if state.is_finished() {
            return Err(StreamCacheError::FetchFinished(self.identity.clone()));
        }

        let mut target = new_frontier;
        if let Some(size) = state.expected_size {
            if target > size {
                warn!(
                    "Fetcher for {} advanced to {} past expected size {}",
                    self.identity, target, size
                );
                target = size;
            }
        }

        state.frontier = state.frontier.max(target);
        let frontier = state.frontier;
        drop(state);

        self.fetched.notify_all();
        Ok(frontier)
    }

    /// Stop the fetch and wake every waiter
    ///
    /// On success the store is committed first; a failed commit turns the
    /// finish into a failure. Calls after the first are ignored.
    pub fn mark_finished(&self, success: bool) {
        {
            let mut state = self.state.lock();
            if state.is_finished() || state.finishing {
                warn!("Fetch for {} already finished, ignoring", self.identity);
                return;
            }
            state.finishing = true;
        }

        let mut success = success;
        if success {
            if let Err(e) = self.store.sync().and_then(|_| self.store.commit()) {
                warn!("Failed to commit {}: {}", self.identity, e);
                success = false;
            }
        }

        let mut state = self.state.lock();
        if success {
            match state.expected_size {
                Some(size) if size != state.frontier => {
                    warn!(
                        "Fetch for {} ended at {} of {} bytes",
                        self.identity, state.frontier, size
                    );
                    state.fetch = FetchState::Failed;
                }
                Some(_) => state.fetch = FetchState::Complete,
                None => {
                    state.expected_size = Some(state.frontier);
                    state.fetch = FetchState::Complete;
                }
            }
        } else {
            state.fetch = FetchState::Failed;
        }

        debug!(
            "Fetch for {} finished: {} ({} bytes)",
            self.identity, state.fetch, state.frontier
        );
        drop(state);

        self.fetched.notify_all();
    }

    /// Record an open reader
    pub fn register_reader(&self, id: ReaderId) {
        let mut state = self.state.lock();
        state.readers.insert(id);
        state.last_touched = Utc::now();
    }

    /// Forget a reader; unknown tokens are ignored
    pub fn unregister_reader(&self, id: ReaderId) {
        let mut state = self.state.lock();
        if state.readers.remove(&id) {
            state.last_touched = Utc::now();
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheEntry")
            .field("identity", &self.identity)
            .field("expected_size", &state.expected_size)
            .field("frontier", &state.frontier)
            .field("fetch", &state.fetch)
            .field("readers", &state.readers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    fn entry(expected: Option<u64>) -> Arc<CacheEntry> {
        let entry = CacheEntry::new("test", Arc::new(MemoryStore::new()), expected);
        entry.begin_fetch().unwrap();
        Arc::new(entry)
    }

    #[test]
    fn frontier_is_monotonic_and_bounded() {
        let entry = entry(Some(100));

        assert_eq!(entry.advance_frontier(40).unwrap(), 40);
        assert_eq!(entry.advance_frontier(10).unwrap(), 40);
        assert_eq!(entry.advance_frontier(250).unwrap(), 100);
        assert_eq!(entry.frontier(), 100);
    }

    #[test]
    fn advance_after_finish_is_rejected() {
        let entry = entry(None);
        entry.advance_frontier(5).unwrap();
        entry.mark_finished(true);

        assert!(matches!(
            entry.advance_frontier(10),
            Err(StreamCacheError::FetchFinished(_))
        ));
        assert_eq!(entry.frontier(), 5);
        assert_eq!(entry.expected_size(), Some(5));
    }

    #[test]
    fn wait_returns_immediately_when_available() {
        let entry = entry(Some(10));
        entry.advance_frontier(8).unwrap();
        assert_eq!(entry.wait_until_fetchable(5).unwrap(), 8);
    }

    #[test]
    fn wait_past_known_end_fails_fast() {
        let entry = entry(Some(10));
        let err = entry.wait_until_fetchable(11).unwrap_err();
        assert!(matches!(err, StreamCacheError::NeverAvailable { offset: 11, .. }));
    }

    #[test]
    fn failed_fetch_releases_waiters_with_error() {
        let entry = entry(Some(100));
        entry.advance_frontier(30).unwrap();

        let waiter = {
            let entry = Arc::clone(&entry);
            thread::spawn(move || entry.wait_until_fetchable(60))
        };

        thread::sleep(Duration::from_millis(20));
        entry.mark_finished(false);

        let result = waiter.join().unwrap();
        assert!(matches!(
            result,
            Err(StreamCacheError::NeverAvailable {
                offset: 60,
                frontier: 30
            })
        ));
        assert!(entry.is_failed());
        assert!(!entry.is_active());
    }

    #[test]
    fn one_advance_releases_every_waiter() {
        let entry = entry(Some(1000));
        let (tx, rx) = mpsc::channel();

        let offsets = [100u64, 200, 300, 400, 500];
        let handles: Vec<_> = offsets
            .iter()
            .map(|&offset| {
                let entry = Arc::clone(&entry);
                let tx = tx.clone();
                thread::spawn(move || {
                    let frontier = entry.wait_until_fetchable(offset).unwrap();
                    tx.send((offset, frontier)).unwrap();
                })
            })
            .collect();
        drop(tx);

        thread::sleep(Duration::from_millis(20));
        assert!(rx.try_recv().is_err());

        entry.advance_frontier(600).unwrap();

        let mut released: Vec<(u64, u64)> = rx
            .iter()
            .take(offsets.len())
            .collect();
        released.sort();
        assert_eq!(released.len(), offsets.len());
        assert!(released.iter().all(|&(_, frontier)| frontier == 600));

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn wait_with_timeout_gives_up() {
        let entry = entry(Some(10));
        let err = entry
            .wait_until_fetchable_timeout(5, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, StreamCacheError::WaitTimedOut { offset: 5, frontier: 0 }));
    }

    #[test]
    fn wait_with_unbounded_timeout_still_reads() {
        let entry = entry(Some(10));
        entry.advance_frontier(8).unwrap();
        let forever = Duration::from_secs(i64::MAX as u64);
        assert_eq!(entry.wait_until_fetchable_timeout(5, forever).unwrap(), 8);

        let waiter = {
            let entry = Arc::clone(&entry);
            thread::spawn(move || entry.wait_until_fetchable_timeout(10, forever))
        };
        thread::sleep(Duration::from_millis(20));
        entry.advance_frontier(10).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), 10);
    }

    /// Store counting commits, slow enough to overlap concurrent finishers
    #[derive(Debug, Default)]
    struct SlowCommitStore {
        inner: MemoryStore,
        commits: AtomicUsize,
    }

    impl BackingStore for SlowCommitStore {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.read_at(offset, buf)
        }

        fn write_at(&self, offset: u64, buf: &[u8]) -> std::io::Result<usize> {
            self.inner.write_at(offset, buf)
        }

        fn set_len(&self, len: u64) -> std::io::Result<()> {
            self.inner.set_len(len)
        }

        fn commit(&self) -> std::io::Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            Ok(())
        }

        fn remove(&self) -> std::io::Result<()> {
            self.inner.remove()
        }
    }

    #[test]
    fn concurrent_finishers_commit_once() {
        let store = Arc::new(SlowCommitStore::default());
        let entry = Arc::new(CacheEntry::new("race", store.clone(), Some(3)));
        entry.begin_fetch().unwrap();
        entry.advance_frontier(3).unwrap();

        let finishers: Vec<_> = (0..4)
            .map(|_| {
                let entry = Arc::clone(&entry);
                thread::spawn(move || entry.mark_finished(true))
            })
            .collect();
        for finisher in finishers {
            finisher.join().unwrap();
        }

        assert_eq!(store.commits.load(Ordering::SeqCst), 1);
        assert_eq!(entry.wait_until_finished(), FetchState::Complete);
    }

    #[test]
    fn wait_until_finished_sees_commit() {
        let store = Arc::new(MemoryStore::new());
        let entry = Arc::new(CacheEntry::new("finish", store.clone(), Some(4)));
        entry.begin_fetch().unwrap();
        entry.advance_frontier(4).unwrap();

        let waiter = {
            let entry = Arc::clone(&entry);
            thread::spawn(move || entry.wait_until_finished())
        };
        thread::sleep(Duration::from_millis(20));
        entry.mark_finished(true);

        assert_eq!(waiter.join().unwrap(), FetchState::Complete);
        assert!(store.is_committed());
    }

    #[test]
    fn second_fetch_is_rejected() {
        let entry = entry(None);
        assert!(matches!(
            entry.begin_fetch(),
            Err(StreamCacheError::DuplicateFetchAttempt(_))
        ));
    }

    #[test]
    fn short_successful_fetch_counts_as_failed() {
        let entry = entry(Some(50));
        entry.advance_frontier(20).unwrap();
        entry.mark_finished(true);

        assert_eq!(entry.fetch_state(), FetchState::Failed);
        assert_eq!(entry.tracked_size(), 20);
    }

    #[test]
    fn size_cannot_change_once_set() {
        let entry = entry(None);
        entry.set_expected_size(10).unwrap();
        entry.set_expected_size(10).unwrap();
        assert!(matches!(
            entry.set_expected_size(11),
            Err(StreamCacheError::SizeConflict { .. })
        ));
    }

    #[test]
    fn learning_size_releases_waiters_past_end() {
        let entry = entry(None);
        let waiter = {
            let entry = Arc::clone(&entry);
            thread::spawn(move || entry.wait_until_fetchable(500))
        };

        thread::sleep(Duration::from_millis(20));
        entry.set_expected_size(100).unwrap();

        assert!(matches!(
            waiter.join().unwrap(),
            Err(StreamCacheError::NeverAvailable { offset: 500, .. })
        ));
    }

    #[test]
    fn readers_block_removal() {
        let entry = entry(Some(1));
        entry.advance_frontier(1).unwrap();
        entry.mark_finished(true);

        let id = ReaderId::new();
        entry.register_reader(id);
        assert!(!entry.is_removable());

        entry.unregister_reader(id);
        entry.unregister_reader(id);
        assert_eq!(entry.reader_count(), 0);
        assert!(entry.is_removable());
    }

    #[test]
    fn successful_finish_commits_store() {
        let store = Arc::new(MemoryStore::new());
        let entry = CacheEntry::new("commit", store.clone(), None);
        entry.begin_fetch().unwrap();
        entry.mark_finished(true);
        assert!(store.is_committed());
    }
}
