//! Preset cache/persistence policies.

use super::resource::ResourcePriority;

/// How a requested image should be cached and persisted.
///
/// A convenience preset mapping to a `(priority, save)` pair for
/// [`request`](crate::application::ResourceManager::request_with_mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Low cache priority, never written to disk.
    #[default]
    NoStorage,
    /// High cache priority; reaches disk only when evicted from the high
    /// bucket (spill), never as part of the download itself.
    HighPriorityOnly,
    /// Low cache priority, persisted to disk on download.
    FullStorage,
}

impl StorageMode {
    /// Whether downloads under this mode are written to disk on completion.
    #[must_use]
    pub const fn should_save(self) -> bool {
        matches!(self, Self::FullStorage)
    }

    /// The cache priority implied by this mode.
    #[must_use]
    pub const fn priority(self) -> ResourcePriority {
        match self {
            Self::HighPriorityOnly => ResourcePriority::High,
            Self::NoStorage | Self::FullStorage => ResourcePriority::Low,
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoStorage => write!(f, "no storage"),
            Self::HighPriorityOnly => write!(f, "high priority, spill-only storage"),
            Self::FullStorage => write!(f, "full storage"),
        }
    }
}
