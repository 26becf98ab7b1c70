//! Backing storage for cached entries
//!
//! A store is a byte-addressable resource with positioned reads and writes.
//! Exactly one fetcher writes to a store while any number of readers read
//! from it at independent offsets, so implementations must allow concurrent
//! positioned reads without an outer lock.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Byte-addressable storage behind one cache entry
///
/// Closing happens on drop of the last handle.
pub trait BackingStore: Send + Sync + fmt::Debug {
    /// Read up to `buf.len()` bytes at `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes at `offset`
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Truncate or extend the store to `len` bytes
    fn set_len(&self, len: u64) -> io::Result<()>;

    /// Make written bytes durable
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }

    /// Promote the store to its committed form once the fetch succeeded
    fn commit(&self) -> io::Result<()> {
        Ok(())
    }

    /// Delete the underlying storage
    fn remove(&self) -> io::Result<()>;
}

/// A previously committed entry found when opening a cache
#[derive(Debug)]
pub struct RestoredEntry {
    pub identity: String,
    pub size: u64,
    pub last_touched: DateTime<Utc>,
    pub store: Arc<dyn BackingStore>,
}

/// Creates and restores stores for a cache
pub trait StoreProvider: Send + Sync {
    /// Create empty storage for a new entry
    fn create(&self, identity: &str) -> io::Result<Arc<dyn BackingStore>>;

    /// Discover committed entries from a previous run
    fn restore(&self) -> io::Result<Vec<RestoredEntry>>;
}

/// File-backed store using positioned I/O on a single handle
///
/// A store created through [`FileStore::staged`] lives at a temporary path
/// until [`BackingStore::commit`] renames it to its final path.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    path: Mutex<PathBuf>,
    commit_to: Mutex<Option<PathBuf>>,
    sidecar: Option<PathBuf>,
}

impl FileStore {
    /// Create (or truncate) a store at `path`
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;

        Ok(Self {
            file,
            path: Mutex::new(path.to_path_buf()),
            commit_to: Mutex::new(None),
            sidecar: None,
        })
    }

    /// Create a store at `temp_path` that moves to `final_path` on commit
    pub fn staged(temp_path: &Path, final_path: &Path) -> io::Result<Self> {
        let store = Self::create(temp_path)?;
        *store.commit_to.lock() = Some(final_path.to_path_buf());
        Ok(store)
    }

    /// Open an existing committed store
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file,
            path: Mutex::new(path.to_path_buf()),
            commit_to: Mutex::new(None),
            sidecar: None,
        })
    }

    /// Attach a metadata file that is deleted together with the store
    pub fn with_sidecar(mut self, sidecar: PathBuf) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    /// Current on-disk path
    pub fn path(&self) -> PathBuf {
        self.path.lock().clone()
    }
}

#[cfg(unix)]
fn positioned_read(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn positioned_write(file: &File, offset: u64, buf: &[u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn positioned_read(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn positioned_write(file: &File, offset: u64, buf: &[u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

impl BackingStore for FileStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        positioned_read(&self.file, offset, buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        positioned_write(&self.file, offset, buf)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn commit(&self) -> io::Result<()> {
        let Some(final_path) = self.commit_to.lock().take() else {
            return Ok(());
        };

        let mut path = self.path.lock();
        fs::rename(&*path, &final_path)?;
        debug!("Committed {} -> {}", path.display(), final_path.display());
        *path = final_path;
        Ok(())
    }

    fn remove(&self) -> io::Result<()> {
        let path = self.path.lock().clone();
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if let Some(ref sidecar) = self.sidecar {
            match fs::remove_file(sidecar) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        debug!("Removed store {}", path.display());
        Ok(())
    }
}

/// In-memory store, for tests and for embedding without a disk
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Vec<u8>>,
    committed: Mutex<bool>,
    removed: Mutex<bool>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `data`
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            ..Default::default()
        }
    }

    /// Whether `commit` has been called
    pub fn is_committed(&self) -> bool {
        *self.committed.lock()
    }

    /// Whether `remove` has been called
    pub fn is_removed(&self) -> bool {
        *self.removed.lock()
    }
}

impl BackingStore for MemoryStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.read();
        let start = usize::try_from(offset).map_err(io::Error::other)?;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        if *self.removed.lock() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "store removed"));
        }
        let mut data = self.data.write();
        let start = usize::try_from(offset).map_err(io::Error::other)?;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(io::Error::other)?;
        self.data.write().resize(len, 0);
        Ok(())
    }

    fn commit(&self) -> io::Result<()> {
        *self.committed.lock() = true;
        Ok(())
    }

    fn remove(&self) -> io::Result<()> {
        *self.removed.lock() = true;
        self.data.write().clear();
        Ok(())
    }
}

/// Provider handing out [`MemoryStore`]s
///
/// Keeps a handle on every store it created so tests can inspect them.
#[derive(Debug, Default)]
pub struct MemoryStoreProvider {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryStoreProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Store created for `identity`, if any
    pub fn store(&self, identity: &str) -> Option<Arc<MemoryStore>> {
        self.stores.lock().get(identity).cloned()
    }
}

impl StoreProvider for MemoryStoreProvider {
    fn create(&self, identity: &str) -> io::Result<Arc<dyn BackingStore>> {
        let store = Arc::new(MemoryStore::new());
        self.stores
            .lock()
            .insert(identity.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn restore(&self) -> io::Result<Vec<RestoredEntry>> {
        Ok(vec![])
    }
}
