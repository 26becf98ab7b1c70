//! Identity-keyed stream cache
//!
//! The [`StreamCache`] owns every [`CacheEntry`] it creates. Requesting a
//! stream either attaches a new reader to an existing entry or creates the
//! entry and starts exactly one fetcher for it.

use crate::cache::disk::FsStoreProvider;
use crate::cache::entry::{CacheEntry, FetchState};
use crate::cache::fetcher::Fetcher;
use crate::cache::reader::{ReaderHandle, ReaderOptions};
use crate::cache::store::{MemoryStoreProvider, StoreProvider};
use crate::error::{StreamCacheError, StreamCacheResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Convert MB to bytes
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

/// Cache size status relative to configured limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSizeStatus {
    /// Under 80% of limit
    Ok,
    /// Between 80% and 100% of limit
    Warning,
    /// Over the limit
    Exceeded,
}

impl CacheSizeStatus {
    /// Determine status based on current size and limit
    pub fn from_usage(current_bytes: u64, limit_bytes: u64) -> Self {
        if limit_bytes == 0 {
            return Self::Ok;
        }
        let percent = Self::percentage(current_bytes, limit_bytes);
        if percent > 100.0 {
            Self::Exceeded
        } else if percent >= 80.0 {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    /// Get percentage of limit used
    pub fn percentage(current_bytes: u64, limit_bytes: u64) -> f64 {
        if limit_bytes == 0 {
            return 0.0;
        }
        (current_bytes as f64 / limit_bytes as f64) * 100.0
    }
}

/// Cache-wide settings
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Byte budget; 0 means unbounded
    pub max_size: u64,
    /// Settings for every reader handed out
    pub reader: ReaderOptions,
}

/// Point-in-time view of one entry
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub identity: String,
    pub size: u64,
    pub frontier: u64,
    pub expected_size: Option<u64>,
    pub state: FetchState,
    pub readers: usize,
    pub last_touched: DateTime<Utc>,
}

impl EntryInfo {
    fn of(entry: &CacheEntry) -> Self {
        Self {
            identity: entry.identity().to_string(),
            size: entry.tracked_size(),
            frontier: entry.frontier(),
            expected_size: entry.expected_size(),
            state: entry.fetch_state(),
            readers: entry.reader_count(),
            last_touched: entry.last_touched(),
        }
    }
}

/// Size-bounded cache of partially available streams
pub struct StreamCache {
    provider: Box<dyn StoreProvider>,
    entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
    max_size: AtomicU64,
    reader_options: ReaderOptions,
}

impl StreamCache {
    /// Open a cache in `dir`, restoring entries committed by earlier runs
    pub fn open(dir: &Path, options: CacheOptions) -> StreamCacheResult<Self> {
        let provider = FsStoreProvider::new(dir).map_err(|e| {
            StreamCacheError::io(format!("creating cache directory {}", dir.display()), e)
        })?;
        Self::with_provider(provider, options)
    }

    /// Cache keeping everything in memory
    pub fn in_memory(options: CacheOptions) -> Self {
        Self::build(Box::new(MemoryStoreProvider::new()), options)
    }

    /// Cache using a custom store provider
    pub fn with_provider(
        provider: impl StoreProvider + 'static,
        options: CacheOptions,
    ) -> StreamCacheResult<Self> {
        let restored = provider
            .restore()
            .map_err(|e| StreamCacheError::io("restoring cache entries", e))?;

        let cache = Self::build(Box::new(provider), options);
        {
            let mut entries = cache.entries.lock();
            for item in restored {
                let entry = CacheEntry::completed(
                    item.identity.clone(),
                    item.store,
                    item.size,
                    item.last_touched,
                );
                entries.insert(item.identity, Arc::new(entry));
            }
            debug!("Restored {} cache entries", entries.len());
        }

        cache.enforce_budget()?;
        Ok(cache)
    }

    fn build(provider: Box<dyn StoreProvider>, options: CacheOptions) -> Self {
        Self {
            provider,
            entries: Mutex::new(HashMap::new()),
            max_size: AtomicU64::new(options.max_size),
            reader_options: options.reader,
        }
    }

    /// Get a reader for `identity`, fetching it with `fetcher` if not cached
    ///
    /// The fetcher is dropped unused when the identity is already cached.
    /// Failing to delete an evicted entry's storage is logged and does not
    /// fail the request.
    pub fn get_stream<F>(&self, identity: &str, fetcher: F) -> StreamCacheResult<ReaderHandle>
    where
        F: Fetcher + 'static,
    {
        let (reader, created, evicted) = {
            let mut entries = self.entries.lock();

            if let Some(entry) = entries.get(identity) {
                entry.touch();
                debug!("Cache hit for {}", identity);
                let reader = ReaderHandle::new(Arc::clone(entry), self.reader_options);
                let evicted = self.evict(&mut entries);
                (reader, None, evicted)
            } else {
                let store = self.provider.create(identity).map_err(|e| {
                    StreamCacheError::io(format!("creating storage for {}", identity), e)
                })?;
                let entry = Arc::new(CacheEntry::new(identity, store, fetcher.expected_size()));
                entry.begin_fetch()?;
                entries.insert(identity.to_string(), Arc::clone(&entry));
                debug!("Cache miss for {}, fetching", identity);

                let reader = ReaderHandle::new(Arc::clone(&entry), self.reader_options);
                let evicted = self.evict(&mut entries);
                (reader, Some(entry), evicted)
            }
        };

        if let Err(e) = evicted {
            debug!("Serving {} despite eviction error: {}", identity, e);
        }

        if let Some(entry) = created {
            if let Err(e) = Box::new(fetcher).start(Arc::clone(&entry)) {
                warn!("Could not start fetch for {}: {}", identity, e);
                entry.mark_finished(false);
                reader.close()?;
                self.discard(&entry);
                return Err(e);
            }
        }

        Ok(reader)
    }

    fn discard(&self, entry: &Arc<CacheEntry>) {
        let mut entries = self.entries.lock();
        let removed = match entries.get(entry.identity()) {
            Some(current) if Arc::ptr_eq(current, entry) && entry.is_removable() => {
                entries.remove(entry.identity())
            }
            _ => None,
        };

        if let Some(entry) = removed {
            // Failures are logged inside
            let _ = Self::delete_storage(vec![entry]);
        }
    }

    /// Byte budget; 0 means unbounded
    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Relaxed)
    }

    /// Change the byte budget, evicting at once if the cache is now over it
    pub fn set_max_size(&self, max_size: u64) -> StreamCacheResult<()> {
        let previous = self.max_size.swap(max_size, Ordering::Relaxed);
        debug!("Cache budget changed from {} to {}", previous, max_size);
        self.enforce_budget().map(|_| ())
    }

    /// Evict eligible entries until the cache fits its budget
    ///
    /// Returns how many entries were evicted.
    pub fn enforce_budget(&self) -> StreamCacheResult<usize> {
        let mut entries = self.entries.lock();
        self.evict(&mut entries)
    }

    /// Remove every eligible entry matching `predicate`
    ///
    /// Entries being fetched or read are skipped even when they match. The
    /// predicate runs under the cache lock and must not call back into the
    /// cache. Returns how many entries were removed.
    pub fn remove<P>(&self, predicate: P) -> StreamCacheResult<usize>
    where
        P: Fn(&CacheEntry) -> bool,
    {
        let mut entries = self.entries.lock();
        let matching: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| predicate(entry.as_ref()))
            .filter(|(identity, entry)| {
                let removable = entry.is_removable();
                if !removable {
                    debug!("Skipping busy entry {}", identity);
                }
                removable
            })
            .map(|(identity, _)| identity.clone())
            .collect();

        let removed: Vec<Arc<CacheEntry>> = matching
            .iter()
            .filter_map(|identity| entries.remove(identity))
            .collect();

        let count = removed.len();
        for entry in &removed {
            info!("Removed {}", entry.identity());
        }
        Self::delete_storage(removed)?;
        Ok(count)
    }

    /// Evict over-budget entries and delete their storage
    ///
    /// Runs with the map locked: a store must be gone before its identity can
    /// be created again, because a re-created store reuses the same paths.
    fn evict(&self, entries: &mut HashMap<String, Arc<CacheEntry>>) -> StreamCacheResult<usize> {
        let victims = self.select_victims(entries);
        let count = victims.len();
        Self::delete_storage(victims)?;
        Ok(count)
    }

    /// Pick entries to evict, dropping them from the map
    ///
    /// Failed fetches go first, then least recently touched.
    fn select_victims(&self, entries: &mut HashMap<String, Arc<CacheEntry>>) -> Vec<Arc<CacheEntry>> {
        let max_size = self.max_size();
        if max_size == 0 {
            return vec![];
        }

        let mut total: u64 = entries.values().map(|e| e.tracked_size()).sum();
        if total <= max_size {
            return vec![];
        }

        let mut candidates: Vec<(bool, DateTime<Utc>, Arc<CacheEntry>)> = entries
            .values()
            .filter(|entry| entry.is_removable())
            .map(|entry| (entry.is_failed(), entry.last_touched(), Arc::clone(entry)))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut victims = vec![];
        for (_, _, entry) in candidates {
            if total <= max_size {
                break;
            }
            total = total.saturating_sub(entry.tracked_size());
            entries.remove(entry.identity());
            info!(
                "Evicting {} ({})",
                entry.identity(),
                format_bytes(entry.tracked_size())
            );
            victims.push(entry);
        }

        if total > max_size {
            warn!(
                "Cache over budget: {} of {} in use, nothing left to evict",
                format_bytes(total),
                format_bytes(max_size)
            );
        }

        victims
    }

    /// Callers hold the map lock
    fn delete_storage(victims: Vec<Arc<CacheEntry>>) -> StreamCacheResult<()> {
        let mut first_error = None;
        for entry in victims {
            if let Err(e) = entry.store().remove() {
                warn!("Failed to delete storage for {}: {}", entry.identity(), e);
                first_error.get_or_insert(StreamCacheError::storage(e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Bytes currently accounted against the budget
    pub fn total_size(&self) -> u64 {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.tracked_size())
            .sum()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `identity` is cached
    pub fn contains(&self, identity: &str) -> bool {
        self.entries.lock().contains_key(identity)
    }

    /// Entry cached under `identity`
    pub fn get(&self, identity: &str) -> Option<Arc<CacheEntry>> {
        self.entries.lock().get(identity).cloned()
    }

    /// Snapshot of all entries, least recently touched first
    pub fn entries(&self) -> Vec<EntryInfo> {
        let mut infos: Vec<EntryInfo> = self
            .entries
            .lock()
            .values()
            .map(|entry| EntryInfo::of(entry))
            .collect();
        infos.sort_by(|a, b| a.last_touched.cmp(&b.last_touched));
        infos
    }
}
