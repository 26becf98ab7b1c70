//! Partial-availability stream cache
//!
//! Resources are cached while they are still being fetched. Readers can
//! consume the prefix that has already arrived and block for the rest.
//!
//! # Entry States
//!
//! | State | Readable | Evictable | Description |
//! |-------|----------|-----------|-------------|
//! | Pending | no | no | Created, fetcher not started yet |
//! | Fetching | up to the frontier | no | Fetcher is writing |
//! | Complete | everything | when unread | All bytes stored and committed |
//! | Failed | up to the frontier | when unread, first | Fetch stopped early |

pub mod disk;
pub mod entry;
pub mod fetcher;
pub mod reader;
pub mod registry;
pub mod store;

pub use disk::{storage_key, FsStoreProvider};
pub use entry::{CacheEntry, FetchState, ReaderId};
pub use fetcher::{
    copy_into_entry, EntryWriter, Fetcher, HttpFetcher, StreamFetcher, DEFAULT_CHUNK_SIZE,
};
pub use reader::{ReadPolicy, ReaderHandle, ReaderOptions};
pub use registry::{
    format_bytes, mb_to_bytes, CacheOptions, CacheSizeStatus, EntryInfo, StreamCache,
};
pub use store::{
    BackingStore, FileStore, MemoryStore, MemoryStoreProvider, RestoredEntry, StoreProvider,
};
