//! Optional TOML file sources.

use crate::config::xdg;
use config::builder::DefaultState;
use config::{ConfigBuilder, File};
use std::path::Path;

pub const WORKSPACE_CONFIG_FILE: &str = "dropsite.toml";

/// `$XDG_CONFIG_HOME/dropsite/config.toml`, when it exists.
pub fn add_global_file(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    match xdg::global_config_path() {
        Ok(path) => builder.add_source(File::from(path).required(false)),
        Err(_) => builder,
    }
}

/// `<workspace>/dropsite.toml`, when it exists.
pub fn add_workspace_file(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> ConfigBuilder<DefaultState> {
    builder.add_source(File::from(workspace_root.join(WORKSPACE_CONFIG_FILE)).required(false))
}
