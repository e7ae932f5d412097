//! Infrastructure layer with concrete cache, storage and network adapters.

/// In-memory caching.
pub mod cache;
/// Configuration.
pub mod config;
/// Network scheduling and transport.
pub mod net;
/// Persistent on-disk storage.
pub mod storage;

pub use cache::{CacheStats, EvictionDelegate, PriorityMemoryCache};
pub use config::{ConfigError, ManagerConfig};
pub use net::{
    DownloadCallback, DownloadEvents, DownloadQueue, DownloadTask, Downloader, Fetched,
    HttpFetcher, TaskState,
};
pub use storage::DiskStore;
