//! Loading manager configuration from disk.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use tracing::debug;

use super::manager_config::ManagerConfig;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "tecknian";
const APP_NAME: &str = "picfetch";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    /// Reading the file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for [`ManagerConfig`].
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// Returns the default config file path for this platform.
///
/// # Errors
/// Returns `ConfigError::ConfigDirNotFound` when no home directory exists.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::ConfigDirNotFound)
}

/// Loads the manager configuration.
///
/// With no override, a missing default file yields `ManagerConfig::default()`;
/// an explicitly given path must exist.
///
/// # Errors
/// Returns `ConfigError` when the file cannot be read or parsed.
pub fn load_config(path_override: Option<&Path>) -> Result<ManagerConfig, ConfigError> {
    let (path, required) = match path_override {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_path()?, false),
    };

    if !path.exists() {
        if required {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        }
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ManagerConfig::default());
    }

    let raw = std::fs::read_to_string(&path)?;
    let config = toml::from_str(&raw)?;
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn explicit_path_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "max_concurrent = 2\nlow_cache_limit = 7").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.low_cache_limit, 7);
    }

    #[test]
    fn invalid_toml_is_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "max_concurrent = \"many\"").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::TomlDe(_)));
    }
}
