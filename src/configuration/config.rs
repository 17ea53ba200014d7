use crate::error_handling::types::ConfigError;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `data_dir`.
pub const DATA_DIR_ENV: &str = "STOCKMASTER_DATA_DIR";

/// Storage layer configuration.
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration. The durable database and the lightweight store file both
/// live under `data_dir`.
///
/// # Examples
///
/// ```
/// use stockmaster::configuration::config::StorageConfig;
///
/// let config = StorageConfig::from_toml_str("data_dir = \"/tmp/stock\"").unwrap();
/// assert_eq!(config.database_path(), std::path::PathBuf::from("/tmp/stock/stockmaster.db"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding both backends' files
    pub data_dir: PathBuf,

    /// File name of the SQLite database (durable backend)
    pub database_file: String,

    /// File name of the JSON key/value file (lightweight backend)
    pub local_store_file: String,

    /// Maximum bytes (keys plus values) the lightweight backend accepts
    pub local_quota_bytes: usize,

    /// Size of the durable backend's connection pool.
    ///
    /// Defaults to a single connection shared by every caller.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            database_file: String::from("stockmaster.db"),
            local_store_file: String::from("local_store.json"),
            local_quota_bytes: 5 * 1024 * 1024,
            max_connections: 1,
        }
    }
}

impl StorageConfig {
    /// Reads and validates a TOML configuration file, then applies env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading storage configuration from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: StorageConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces `data_dir` with `STOCKMASTER_DATA_DIR` when that variable is set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                info!("Using data directory from {}: {}", DATA_DIR_ENV, dir);
                self.data_dir = PathBuf::from(dir);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "database_file must not be empty".into(),
            ));
        }
        if self.local_store_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "local_store_file must not be empty".into(),
            ));
        }
        if self.database_file == self.local_store_file {
            return Err(ConfigError::InvalidValue(
                "database_file and local_store_file must differ".into(),
            ));
        }
        if self.local_quota_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "local_quota_bytes must be greater than zero".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "max_connections must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn local_store_path(&self) -> PathBuf {
        self.data_dir.join(&self.local_store_file)
    }

    /// Convenience for tests and tools: defaults rooted at `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            data_dir: dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = StorageConfig::from_toml_str("").unwrap();
        assert_eq!(config, StorageConfig::default());
        assert_eq!(config.local_quota_bytes, 5 * 1024 * 1024);
        assert_eq!(config.max_connections, 1);
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let config = StorageConfig::from_toml_str(
            "data_dir = \"/var/lib/stock\"\nlocal_quota_bytes = 1024\n",
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/stock"));
        assert_eq!(config.local_quota_bytes, 1024);
        assert_eq!(config.database_file, "stockmaster.db");
        assert_eq!(
            config.local_store_path(),
            PathBuf::from("/var/lib/stock/local_store.json")
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            StorageConfig::from_toml_str("local_quota_bytes = 0"),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            StorageConfig::from_toml_str("database_file = \"\""),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            StorageConfig::from_toml_str("database_file = \"a\"\nlocal_store_file = \"a\""),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            StorageConfig::from_toml_str("max_connections = \"many\""),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_file_applies_env_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.toml");
        std::fs::write(&path, "data_dir = \"/from/file\"\n").unwrap();

        std::env::set_var(DATA_DIR_ENV, "/from/env");
        let config = StorageConfig::from_file(&path);
        std::env::remove_var(DATA_DIR_ENV);

        assert_eq!(config.unwrap().data_dir, PathBuf::from("/from/env"));
    }

    #[test]
    #[serial]
    fn test_from_file_without_override() {
        std::env::remove_var(DATA_DIR_ENV);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.toml");
        std::fs::write(&path, "data_dir = \"/from/file\"\n").unwrap();

        let config = StorageConfig::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/from/file"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = StorageConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
