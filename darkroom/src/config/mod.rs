//! Configuration management for darkroom
//!
//! Configuration is loaded from multiple sources with clear precedence:
//!
//! 1. Environment variables (highest priority, `DARKROOM_` prefix, `__` for nesting)
//! 2. `./darkroom.toml` (or an explicit file passed to [`DarkroomConfig::load_from`])
//! 3. `~/.config/darkroom/config.toml` (user config, XDG)
//! 4. `/etc/darkroom/config.toml` (system config)
//! 5. Hardcoded defaults (fallback)
//!
//! Defaults live here and nowhere else; the pipeline only ever reads
//! values out of these settings.
//!
//! # Example Configuration
//!
//! ```toml
//! [pipeline]
//! worker_pool_size = 4
//! queue_capacity = 100
//! processing_timeout_ms = 300000
//! executor_timeout_ms = 60000
//! max_redispatches = 3
//!
//! [retention]
//! retention_window_secs = 86400
//! sweep_interval_secs = 3600
//!
//! [storage]
//! database_url = "sqlite://./darkroom.db"
//! blob_dir = "./blobs"
//!
//! [transform]
//! width = 800
//! height = 600
//! ```
//!
//! Environment overrides use the section name as a prefix, for example
//! `DARKROOM_PIPELINE__WORKER_POOL_SIZE=8`.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or did not match the expected shape
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),

    /// Defaults could not be serialized
    #[error("failed to serialize default configuration: {0}")]
    Defaults(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Worker pool, queue and watchdog configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Number of concurrent workers
    pub worker_pool_size: usize,

    /// Maximum number of job ids waiting for a worker (0 rejects every submission)
    pub queue_capacity: usize,

    /// Time in `processing` after which the watchdog intervenes
    pub processing_timeout_ms: u64,

    /// Upper bound on a single executor call
    pub executor_timeout_ms: u64,

    /// Watchdog re-dispatches before a stalled job is failed
    pub max_redispatches: u32,

    /// How often the watchdog scans for stalled jobs
    pub watchdog_interval_ms: u64,

    /// How long `Submit` may wait for queue space (0 fails fast)
    pub submit_wait_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            queue_capacity: 100,
            processing_timeout_ms: 300_000, // 5 minutes
            executor_timeout_ms: 60_000,
            max_redispatches: 3,
            watchdog_interval_ms: 30_000,
            submit_wait_ms: 0,
        }
    }
}

impl PipelineSettings {
    /// Processing timeout as a [`Duration`]
    #[must_use]
    pub const fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    /// Executor timeout as a [`Duration`]
    #[must_use]
    pub const fn executor_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_timeout_ms)
    }

    /// Watchdog interval as a [`Duration`]
    #[must_use]
    pub const fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Submit wait as a [`Duration`]
    #[must_use]
    pub const fn submit_wait(&self) -> Duration {
        Duration::from_millis(self.submit_wait_ms)
    }

    /// Check ranges and cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the pool is empty, an interval is
    /// zero, or the executor timeout is not shorter than the processing
    /// timeout (the watchdog would re-dispatch healthy jobs).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.processing_timeout_ms == 0 || self.executor_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline timeouts must be greater than zero".to_string(),
            ));
        }
        if self.watchdog_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.watchdog_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.executor_timeout_ms >= self.processing_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "pipeline.executor_timeout_ms ({}) must be shorter than pipeline.processing_timeout_ms ({})",
                self.executor_timeout_ms, self.processing_timeout_ms
            )));
        }
        Ok(())
    }
}

/// Retention sweeper configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Age at which a job and its blobs are reclaimed
    pub retention_window_secs: u64,

    /// How often the sweeper runs
    pub sweep_interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            retention_window_secs: 86_400, // 1 day
            sweep_interval_secs: 3_600,
        }
    }
}

impl RetentionSettings {
    /// Longest accepted retention window (100 years)
    pub const MAX_RETENTION_WINDOW_SECS: u64 = 100 * 365 * 86_400;

    /// Retention window as a [`Duration`]
    #[must_use]
    pub const fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_window_secs)
    }

    /// Sweep interval as a [`Duration`]
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Check ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the sweep interval is zero or the
    /// retention window exceeds [`MAX_RETENTION_WINDOW_SECS`](Self::MAX_RETENTION_WINDOW_SECS).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "retention.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.retention_window_secs > Self::MAX_RETENTION_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "retention.retention_window_secs ({}) must not exceed {}",
                self.retention_window_secs,
                Self::MAX_RETENTION_WINDOW_SECS
            )));
        }
        Ok(())
    }
}

/// Record store and blob store locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite connection URL for job records
    pub database_url: String,

    /// Root directory of the blob store
    pub blob_dir: PathBuf,

    /// Maximum pooled database connections
    pub max_connections: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./darkroom.db".to_string(),
            blob_dir: PathBuf::from("./blobs"),
            max_connections: 5,
        }
    }
}

/// Output geometry of the grayscale transform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    /// Output width in pixels
    pub width: u32,

    /// Output height in pixels
    pub height: u32,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// Complete darkroom configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DarkroomConfig {
    /// Worker pool, queue and watchdog
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Retention sweeper
    #[serde(default)]
    pub retention: RetentionSettings,

    /// Record and blob storage
    #[serde(default)]
    pub storage: StorageSettings,

    /// Transform geometry
    #[serde(default)]
    pub transform: TransformSettings,
}

impl DarkroomConfig {
    /// Load configuration from the standard locations
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Default configuration cannot be serialized to TOML
    /// - A configuration file cannot be read or parsed
    /// - Values fail type conversion or [`validate`](Self::validate)
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Self::defaults()?;

        let system_config = PathBuf::from("/etc/darkroom/config.toml");
        if system_config.exists() {
            figment = figment.merge(Toml::file(&system_config));
        }

        let user_config = Self::recommended_path();
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }

        let local_config = PathBuf::from("./darkroom.toml");
        if local_config.exists() {
            figment = figment.merge(Toml::file(&local_config));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific file, with environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file at `path` cannot be read or contains invalid TOML
    /// - Values fail type conversion or [`validate`](Self::validate)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Invalid(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        }
        Self::finish(Self::defaults()?.merge(Toml::file(path)))
    }

    /// Parse configuration from a TOML string, with environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or values fail validation.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::finish(Self::defaults()?.merge(Toml::string(toml)))
    }

    /// Get the recommended XDG config path
    #[must_use]
    pub fn recommended_path() -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from("./darkroom.toml"),
            |config_dir| config_dir.join("darkroom").join("config.toml"),
        )
    }

    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.retention.validate()?;
        if self.transform.width == 0 || self.transform.height == 0 {
            return Err(ConfigError::Invalid(
                "transform dimensions must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn defaults() -> Result<Figment, ConfigError> {
        Ok(Figment::new().merge(Toml::string(&toml::to_string(&Self::default())?)))
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed("DARKROOM_").split("__").lowercase(true))
            .extract()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DarkroomConfig::default();
        assert_eq!(config.pipeline.worker_pool_size, 4);
        assert_eq!(config.pipeline.queue_capacity, 100);
        assert_eq!(config.pipeline.max_redispatches, 3);
        assert_eq!(config.retention.retention_window(), Duration::from_secs(86_400));
        assert_eq!((config.transform.width, config.transform.height), (800, 600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = DarkroomConfig::from_toml_str(
            r#"
            [pipeline]
            worker_pool_size = 2
            queue_capacity = 0

            [storage]
            blob_dir = "/var/lib/darkroom/blobs"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.worker_pool_size, 2);
        assert_eq!(config.pipeline.queue_capacity, 0);
        // Untouched values keep their defaults
        assert_eq!(config.pipeline.processing_timeout_ms, 300_000);
        assert_eq!(config.storage.blob_dir, PathBuf::from("/var/lib/darkroom/blobs"));
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                "[pipeline]\nworker_pool_size = 2\n",
            )?;
            jail.set_env("DARKROOM_PIPELINE__WORKER_POOL_SIZE", "9");

            let config = DarkroomConfig::load_from("custom.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.pipeline.worker_pool_size, 9);
            Ok(())
        });
    }

    #[test]
    fn test_rejects_empty_pool() {
        let err = DarkroomConfig::from_toml_str("[pipeline]\nworker_pool_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_executor_timeout_at_or_above_processing_timeout() {
        let settings = PipelineSettings {
            processing_timeout_ms: 1_000,
            executor_timeout_ms: 1_000,
            ..PipelineSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_retention_window() {
        let err = DarkroomConfig::from_toml_str("[retention]\nretention_window_secs = 10000000000000\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let longest = format!(
            "[retention]\nretention_window_secs = {}\n",
            RetentionSettings::MAX_RETENTION_WINDOW_SECS
        );
        assert!(DarkroomConfig::from_toml_str(&longest).is_ok());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(DarkroomConfig::load_from("/definitely/not/here.toml").is_err());
    }
}
