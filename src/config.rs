//! Store configuration
//!
//! Read from a JSON file. Only `data_dir` is required.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::FlushRetryPolicy;
use crate::error::{StoreError, StoreResult};
use crate::observability::{log_event_with_fields, Event, Severity};

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data directory (required)
    pub data_dir: PathBuf,

    /// Background flush interval (default 4s)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Longest a unit may hold the write slot (default 30s)
    #[serde(default = "default_max_hold_ms")]
    pub max_hold_ms: u64,

    /// Attempts per flush before reporting failure
    #[serde(default = "default_flush_max_attempts")]
    pub flush_max_attempts: u32,

    /// Delay before the first flush retry, doubled per attempt
    #[serde(default = "default_flush_backoff_ms")]
    pub flush_backoff_ms: u64,

    /// Minimum log severity: trace, info, warn, error or fatal
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_flush_interval_ms() -> u64 {
    4000
}
fn default_max_hold_ms() -> u64 {
    30_000
}
fn default_flush_max_attempts() -> u32 {
    3
}
fn default_flush_backoff_ms() -> u64 {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}

impl StoreConfig {
    /// Configuration with defaults for everything but the data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            flush_interval_ms: default_flush_interval_ms(),
            max_hold_ms: default_max_hold_ms(),
            flush_max_attempts: default_flush_max_attempts(),
            flush_backoff_ms: default_flush_backoff_ms(),
            log_level: default_log_level(),
        }
    }

    /// Load and validate configuration from file
    pub fn load(path: &Path) -> StoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config: StoreConfig = serde_json::from_str(&content)
            .map_err(|e| StoreError::Config(format!("invalid config JSON: {}", e)))?;

        config.validate()?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("path", &path.display().to_string()),
                ("data_dir", &config.data_dir.display().to_string()),
            ],
        );
        Ok(config)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(StoreError::Config("data_dir must not be empty".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(StoreError::Config("flush_interval_ms must be > 0".into()));
        }
        if self.max_hold_ms == 0 {
            return Err(StoreError::Config("max_hold_ms must be > 0".into()));
        }
        if self.flush_max_attempts == 0 {
            return Err(StoreError::Config("flush_max_attempts must be > 0".into()));
        }
        self.severity()?;
        Ok(())
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::Config(format!("cannot serialize config: {}", e)))?;
        fs::write(path, json).map_err(|e| {
            StoreError::adapter_io(format!("failed to write {}", path.display()), e)
        })
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn max_hold(&self) -> Duration {
        Duration::from_millis(self.max_hold_ms)
    }

    pub fn retry_policy(&self) -> FlushRetryPolicy {
        FlushRetryPolicy {
            max_attempts: self.flush_max_attempts,
            backoff: Duration::from_millis(self.flush_backoff_ms),
        }
    }

    /// Parsed `log_level`
    pub fn severity(&self) -> StoreResult<Severity> {
        Severity::parse(&self.log_level).ok_or_else(|| {
            StoreError::Config(format!("unknown log_level '{}'", self.log_level))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fieldstore.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_applied() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{"data_dir": "/tmp/field"}"#);

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config, StoreConfig::new("/tmp/field"));
        assert_eq!(config.flush_interval(), Duration::from_secs(4));
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_missing_data_dir_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{"flush_interval_ms": 10}"#);
        assert!(matches!(
            StoreConfig::load(&path),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = StoreConfig::new("/tmp/field");
        config.flush_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::new("/tmp/field");
        config.flush_max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::new("/tmp/field");
        config.max_hold_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_level() {
        let mut config = StoreConfig::new("/tmp/field");
        config.log_level = "verbose".into();
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fieldstore.json");
        let mut config = StoreConfig::new(dir.path().join("data"));
        config.max_hold_ms = 500;
        config.save(&path).unwrap();

        assert_eq!(StoreConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(StoreConfig::load(&dir.path().join("absent.json")).is_err());
    }
}
