//! On-disk cache layout
//!
//! Each identity is stored under the hex SHA-256 of the identity:
//!
//! ```text
//! cache_dir/
//! ├── 9f86d08...          # committed content
//! ├── 9f86d08....json     # sidecar: identity + creation time
//! └── 2c26b46....tmp      # content still being fetched
//! ```
//!
//! Temp files left behind by a crash are deleted on open; their entries are
//! fetched again on next request.

use crate::cache::store::{BackingStore, FileStore, RestoredEntry, StoreProvider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const TEMP_SUFFIX: &str = "tmp";
const SIDECAR_SUFFIX: &str = "json";

/// Metadata written next to each cached file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    /// Identity the content was cached under
    pub identity: String,
    /// When the entry was first created
    pub created_at: DateTime<Utc>,
}

/// Derive the on-disk key for an identity
pub fn storage_key(identity: &str) -> String {
    hex::encode(Sha256::digest(identity.as_bytes()))
}

/// Store provider rooted at a cache directory
#[derive(Debug, Clone)]
pub struct FsStoreProvider {
    dir: PathBuf,
}

impl FsStoreProvider {
    /// Create a provider, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Cache directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn content_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, TEMP_SUFFIX))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, SIDECAR_SUFFIX))
    }

    fn restore_one(&self, sidecar_path: &Path) -> io::Result<Option<RestoredEntry>> {
        let content = fs::read_to_string(sidecar_path)?;
        let sidecar: Sidecar = serde_json::from_str(&content).map_err(io::Error::other)?;
        let key = storage_key(&sidecar.identity);
        let content_path = self.content_path(&key);

        let metadata = match fs::metadata(&content_path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    "Dropping sidecar without content for {}",
                    sidecar.identity
                );
                fs::remove_file(sidecar_path)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let last_touched: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or(sidecar.created_at);

        let store =
            FileStore::open(&content_path)?.with_sidecar(sidecar_path.to_path_buf());

        Ok(Some(RestoredEntry {
            identity: sidecar.identity,
            size: metadata.len(),
            last_touched,
            store: Arc::new(store),
        }))
    }
}

impl StoreProvider for FsStoreProvider {
    fn create(&self, identity: &str) -> io::Result<Arc<dyn BackingStore>> {
        let key = storage_key(identity);
        let sidecar_path = self.sidecar_path(&key);

        let sidecar = Sidecar {
            identity: identity.to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&sidecar).map_err(io::Error::other)?;
        fs::write(&sidecar_path, json)?;

        let store = FileStore::staged(&self.temp_path(&key), &self.content_path(&key))?
            .with_sidecar(sidecar_path);

        debug!("Created store {} for {}", key, identity);
        Ok(Arc::new(store))
    }

    fn restore(&self) -> io::Result<Vec<RestoredEntry>> {
        let mut restored = vec![];

        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            let extension = path.extension().and_then(|e| e.to_str());

            match extension {
                Some(TEMP_SUFFIX) => {
                    debug!("Removing stale temp file {}", path.display());
                    fs::remove_file(&path)?;
                }
                Some(SIDECAR_SUFFIX) => match self.restore_one(&path) {
                    Ok(Some(entry)) => restored.push(entry),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping unreadable cache entry {}: {}", path.display(), e),
                },
                _ => {}
            }
        }

        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn storage_key_is_stable_hex() {
        let key = storage_key("INBOX/42/attachment-1");
        assert_eq!(key.len(), 64);
        assert_eq!(key, storage_key("INBOX/42/attachment-1"));
        assert_ne!(key, storage_key("INBOX/42/attachment-2"));
    }

    #[test]
    fn create_stages_into_temp_file() {
        let temp = TempDir::new().unwrap();
        let provider = FsStoreProvider::new(temp.path()).unwrap();
        let store = provider.create("msg-1").unwrap();
        store.write_at(0, b"payload").unwrap();

        let key = storage_key("msg-1");
        assert!(temp.path().join(format!("{}.tmp", key)).exists());
        assert!(temp.path().join(format!("{}.json", key)).exists());

        store.commit().unwrap();
        assert!(temp.path().join(&key).exists());
    }

    #[test]
    fn restore_finds_committed_and_drops_partial() {
        let temp = TempDir::new().unwrap();
        let provider = FsStoreProvider::new(temp.path()).unwrap();

        let done = provider.create("done").unwrap();
        done.write_at(0, b"0123456789").unwrap();
        done.commit().unwrap();

        let partial = provider.create("partial").unwrap();
        partial.write_at(0, b"01").unwrap();
        drop(done);
        drop(partial);

        let restored = provider.restore().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].identity, "done");
        assert_eq!(restored[0].size, 10);

        let partial_key = storage_key("partial");
        assert!(!temp.path().join(format!("{}.tmp", partial_key)).exists());
        assert!(!temp.path().join(format!("{}.json", partial_key)).exists());
    }
}
