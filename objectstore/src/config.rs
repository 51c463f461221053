//! Store configuration module.
//!
//! This module provides configuration loading for the object store from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `OBJECTSTORE_DIRECTORY`: Directory where collection files are stored (default: `./data`)
//! - `OBJECTSTORE_LOCK_TIMEOUT_MS`: Lock acquisition timeout in milliseconds (default: `10000`)
//! - `OBJECTSTORE_CACHE_BLOCKS`: Block cache capacity per file (default: `1024`)
//!
//! # Invariants
//!
//! - `directory` is always a valid path (may not exist yet)
//! - `cache_blocks` is always greater than zero

use std::path::PathBuf;
use std::time::Duration;

use crate::storage::cache::DEFAULT_CACHE_BLOCKS;

/// Store configuration.
///
/// # Post-conditions
///
/// - `cache_blocks > 0`
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory where collection files are stored.
    /// A collection's primary file is at `{directory}/{name}.btree`, its
    /// indexes at `{directory}/{name}.{index}.index`.
    pub directory: PathBuf,
    /// How long `begin_read`/`begin_write` wait for the collection lock.
    pub lock_timeout: Duration,
    /// Number of 8KB blocks each file keeps in its cache.
    pub cache_blocks: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl StoreConfig {
    /// Default collection directory.
    pub const DEFAULT_DIRECTORY: &'static str = "./data";
    /// Default lock timeout.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default block cache capacity per file.
    pub const DEFAULT_CACHE_BLOCKS: usize = DEFAULT_CACHE_BLOCKS;

    /// Configuration with defaults for everything but the directory.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
            cache_blocks: Self::DEFAULT_CACHE_BLOCKS,
        }
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Set the cache capacity. Zero is raised to one.
    #[must_use]
    pub fn with_cache_blocks(mut self, cache_blocks: usize) -> Self {
        self.cache_blocks = cache_blocks.max(1);
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `OBJECTSTORE_LOCK_TIMEOUT_MS` is set but not a number of milliseconds
    /// - `OBJECTSTORE_CACHE_BLOCKS` is set but not a positive number
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            directory: Self::load_directory(),
            lock_timeout: Self::load_lock_timeout()?,
            cache_blocks: Self::load_cache_blocks()?,
        })
    }

    /// Load the collection directory from environment.
    ///
    /// Returns the default if not set.
    fn load_directory() -> PathBuf {
        std::env::var("OBJECTSTORE_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_DIRECTORY))
    }

    /// Load the lock timeout from environment.
    ///
    /// Returns the default if not set.
    fn load_lock_timeout() -> Result<Duration, ConfigError> {
        match std::env::var("OBJECTSTORE_LOCK_TIMEOUT_MS") {
            Ok(value) => parse_lock_timeout(&value),
            Err(_) => Ok(Self::DEFAULT_LOCK_TIMEOUT),
        }
    }

    /// Load the cache capacity from environment.
    ///
    /// Returns the default if not set.
    fn load_cache_blocks() -> Result<usize, ConfigError> {
        match std::env::var("OBJECTSTORE_CACHE_BLOCKS") {
            Ok(value) => parse_cache_blocks(&value),
            Err(_) => Ok(Self::DEFAULT_CACHE_BLOCKS),
        }
    }
}

fn parse_lock_timeout(value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidValue {
            name: "OBJECTSTORE_LOCK_TIMEOUT_MS".to_string(),
            message: format!("'{value}' is not a number of milliseconds"),
        })
}

fn parse_cache_blocks(value: &str) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name: "OBJECTSTORE_CACHE_BLOCKS".to_string(),
            message: format!("'{value}' is not a positive number of blocks"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(StoreConfig::DEFAULT_DIRECTORY, "./data");
        assert_eq!(StoreConfig::DEFAULT_LOCK_TIMEOUT, Duration::from_millis(10_000));
        assert_eq!(StoreConfig::DEFAULT_CACHE_BLOCKS, 1024);
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("/tmp/x")
            .with_lock_timeout(Duration::from_millis(5))
            .with_cache_blocks(0);
        assert_eq!(config.directory, PathBuf::from("/tmp/x"));
        assert_eq!(config.lock_timeout, Duration::from_millis(5));
        assert_eq!(config.cache_blocks, 1);
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(parse_lock_timeout("250"), Ok(Duration::from_millis(250)));
        assert!(parse_lock_timeout("soon").is_err());
        assert_eq!(parse_cache_blocks("64"), Ok(64));
        assert!(parse_cache_blocks("0").is_err());
        assert!(parse_cache_blocks("-3").is_err());
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
