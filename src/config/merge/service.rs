//! MergeService: orchestrates sources and deserializes to DropsiteConfig.

use crate::config::sources::{environment, files};
use crate::config::DropsiteConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File};
use std::path::Path;

pub struct MergeService;

/// Builder seeded with the serialized defaults, so partial files only override
/// what they name.
fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&DropsiteConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}

impl MergeService {
    /// Precedence: defaults (lowest) -> global file -> workspace file -> environment (highest).
    pub fn load(workspace_root: &Path) -> Result<DropsiteConfig, ConfigError> {
        let builder = builder_with_defaults()?;
        let builder = files::add_global_file(builder);
        let builder = files::add_workspace_file(builder, workspace_root);
        let builder = environment::add_to_builder(builder)?;
        builder.build()?.try_deserialize()
    }

    /// Load from a specific file with the environment overlay.
    pub fn load_from_file(path: &Path) -> Result<DropsiteConfig, ConfigError> {
        let builder = builder_with_defaults()?.add_source(File::from(path).required(true));
        let builder = environment::add_to_builder(builder)?;
        builder.build()?.try_deserialize()
    }
}
