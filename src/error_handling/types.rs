use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// Errors raised by the storage backends and the migration coordinator.
///
/// None of these cross the `Storage` facade boundary: the facade logs them and
/// falls back to the lightweight store or reports the value as absent.
#[derive(Debug)]
pub enum StorageError {
    /// The durable backend could not be opened or its schema created.
    Initialization(String),
    /// A durable backend primitive was called before a successful open (or after close).
    Uninitialized,
    ReadFailed(String),
    WriteFailed(String),
    /// A stored payload could not be encoded or decoded.
    Serialization(String),
    /// The lightweight store would exceed its byte quota.
    QuotaExceeded { requested: usize, quota: usize },
    ProductNotFound(i64),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Initialization(e) => write!(f, "Storage initialization failed: {}", e),
            StorageError::Uninitialized => write!(f, "Storage backend is not open"),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::Serialization(e) => write!(f, "Storage serialization error: {}", e),
            StorageError::QuotaExceeded { requested, quota } => write!(
                f,
                "Storage quota exceeded: {} byte(s) requested, quota is {}",
                requested, quota
            ),
            StorageError::ProductNotFound(id) => write!(f, "Product {} not found", id),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
