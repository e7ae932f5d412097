//! Runtime knobs for the resource manager.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::infrastructure::net::{DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT_SECS};
use crate::infrastructure::storage::DEFAULT_SIZE_LIMIT;

/// Configuration for a [`ResourceManager`](crate::application::ResourceManager).
///
/// Deserializable from a TOML file; absent keys fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Cap on simultaneous downloads.
    pub max_concurrent: usize,
    /// Entry budget of the protected high-priority cache bucket.
    pub high_cache_limit: usize,
    /// Entry budget of the expendable low-priority cache bucket.
    pub low_cache_limit: usize,
    /// Disk store directory; `None` selects the platform cache dir.
    pub storage_dir: Option<PathBuf>,
    /// Disk store byte budget (0 = unlimited).
    pub storage_limit_bytes: u64,
    /// Per-request transport timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            high_cache_limit: 50,
            low_cache_limit: 100,
            storage_dir: None,
            storage_limit_bytes: DEFAULT_SIZE_LIMIT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.timeout_secs, 30);
        assert!(config.storage_dir.is_none());
        assert!(config.storage_limit_bytes > 0);
    }

    #[test]
    fn partial_toml_fills_missing_keys_from_defaults() {
        let config: ManagerConfig = toml::from_str("max_concurrent = 8").unwrap();
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.high_cache_limit, ManagerConfig::default().high_cache_limit);
    }
}
