//! Configuration Management
//!
//! `DropsiteConfig` is layered from built-in defaults, the global config file
//! (`$XDG_CONFIG_HOME/dropsite/config.toml`), the workspace file
//! (`<workspace>/dropsite.toml`) and `DROPSITE__*` environment variables, in
//! increasing precedence.

pub mod facade;
pub mod merge {
    pub mod service;
}
pub mod paths {
    pub mod xdg_root;
}
pub mod sources {
    pub mod environment;
    pub mod files;
}
pub mod workspace {
    pub mod storage_paths;
}

pub use facade::ConfigLoader;
pub use paths::xdg_root as xdg;
pub use workspace::storage_paths::StorageConfig;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::resource::ServeSettings;
use crate::site::SiteSettings;
use crate::task::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the remote tree comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Local directory served as the remote root.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Remote-side prefix of the site tree
    #[serde(default)]
    pub base_dir: String,
}

fn default_poll_interval() -> u64 {
    120
}

fn default_file_poll_interval() -> u64 {
    10
}

fn default_fetch_timeout() -> u64 {
    600
}

fn default_config_path() -> String {
    "/site.yaml".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minimum seconds between syncs of a directory
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum seconds between syncs of a single file
    #[serde(default = "default_file_poll_interval")]
    pub file_poll_interval_secs: u64,

    /// Seconds after which an unfinished fetch is requested again
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Site configuration file inside the remote tree
    #[serde(default = "default_config_path")]
    pub config_path: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            file_poll_interval_secs: default_file_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            config_path: default_config_path(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_max_retry_attempts() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_queue_size() -> usize {
    10000
}

/// Task queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        QueueConfig {
            workers: settings.workers,
            max_retry_attempts: settings.max_retry_attempts,
            retry_delay_ms: settings.retry_delay_ms,
            max_queue_size: settings.max_queue_size,
        }
    }
}

fn default_proxy_max_age() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Emit proxy cache headers for binary resources
    #[serde(default = "default_true")]
    pub proxy_enabled: bool,

    #[serde(default = "default_proxy_max_age")]
    pub proxy_max_age_secs: u64,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            proxy_enabled: true,
            proxy_max_age_secs: default_proxy_max_age(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropsiteConfig {
    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub serve: ServeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DropsiteConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.sync.poll_interval_secs == 0 {
            return Err(ApiError::ConfigError(
                "sync.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.queue.workers == 0 {
            return Err(ApiError::ConfigError("queue.workers must be at least 1".to_string()));
        }
        if self.queue.max_retry_attempts == 0 {
            return Err(ApiError::ConfigError(
                "queue.max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if !self.sync.config_path.starts_with('/') {
            return Err(ApiError::ConfigError(format!(
                "sync.config_path must be absolute within the site tree: {}",
                self.sync.config_path
            )));
        }
        Ok(())
    }

    pub fn site_settings(&self) -> SiteSettings {
        let secs = |s: u64| {
            chrono::Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX).min(i64::MAX / 1000))
        };
        SiteSettings {
            base_dir: self.remote.base_dir.clone(),
            config_path: self.sync.config_path.clone(),
            dir_poll_interval: secs(self.sync.poll_interval_secs),
            file_poll_interval: secs(self.sync.file_poll_interval_secs),
            fetch_timeout: secs(self.sync.fetch_timeout_secs),
            serve: ServeSettings {
                proxy_enabled: self.serve.proxy_enabled,
                proxy_max_age: self.serve.proxy_max_age_secs,
            },
        }
    }
}
