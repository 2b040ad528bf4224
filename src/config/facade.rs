//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::DropsiteConfig;
use config::ConfigError;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace from files and environment.
    pub fn load(workspace_root: &Path) -> Result<DropsiteConfig, ConfigError> {
        MergeService::load(workspace_root)
    }

    /// Load configuration from a specific file, with the environment on top.
    pub fn load_from_file(path: &Path) -> Result<DropsiteConfig, ConfigError> {
        MergeService::load_from_file(path)
    }

    pub fn default() -> DropsiteConfig {
        DropsiteConfig::default()
    }
}
