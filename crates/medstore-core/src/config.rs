//! Store configuration

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the medical platform database
pub const DEFAULT_DATABASE_NAME: &str = "medical-platform";

/// Schema version the platform currently ships
pub const DEFAULT_VERSION: u32 = 1;

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the database file
    pub data_dir: PathBuf,

    /// Database name, also the file stem
    pub database_name: String,

    /// Requested schema version
    pub version: u32,

    /// How long a connection waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("medstore"),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            version: DEFAULT_VERSION,
            busy_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    /// Load a configuration from a JSON file. Missing fields use defaults.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            StoreError::config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Use a different data directory
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Request a different schema version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Check the values a database cannot be opened with.
    pub fn validate(&self) -> StoreResult<()> {
        if self.database_name.is_empty() {
            return Err(StoreError::config("database_name must not be empty"));
        }
        if self
            .database_name
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '\0'))
        {
            return Err(StoreError::config(format!(
                "database_name contains a path separator: {}",
                self.database_name
            )));
        }
        if self.version == 0 {
            return Err(StoreError::config("version must be at least 1"));
        }
        Ok(())
    }

    /// Path of the database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite3", self.database_name))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.database_name, "medical-platform");
        assert_eq!(config.version, 1);
        assert!(config.data_dir.ends_with("medstore"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_path() {
        let config = StoreConfig::default().with_data_dir("/tmp/ms");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/ms/medical-platform.sqlite3")
        );
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medstore.json");
        std::fs::write(&path, r#"{ "version": 3, "busy_timeout_ms": 250 }"#).unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.database_name, DEFAULT_DATABASE_NAME);
    }

    #[test]
    fn test_load_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medstore.json");

        std::fs::write(&path, r#"{ "version": 0 }"#).unwrap();
        assert!(matches!(StoreConfig::load(&path), Err(StoreError::Config(_))));

        std::fs::write(&path, r#"{ "database_name": "../escape" }"#).unwrap();
        assert!(matches!(StoreConfig::load(&path), Err(StoreError::Config(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(StoreConfig::load(&path), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = StoreConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
