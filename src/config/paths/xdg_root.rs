//! XDG Base Directory locations for configuration and workspace data.

use crate::error::ApiError;
use std::path::{Component, Path, PathBuf};

const APP_DIR: &str = "dropsite";

/// `$XDG_DATA_HOME`, falling back to `$HOME/.local/share`.
pub fn data_home() -> Option<PathBuf> {
    if let Ok(xdg_data_home) = std::env::var("XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg_data_home));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("share"))
}

/// Data directory of one workspace: `$XDG_DATA_HOME/dropsite/<workspace path>/`.
///
/// The canonical workspace path is mirrored below the data home, so
/// `/home/user/site` maps to `$XDG_DATA_HOME/dropsite/home/user/site/`.
pub fn workspace_data_dir(workspace_root: &Path) -> Result<PathBuf, ApiError> {
    let data_home = data_home().ok_or_else(|| {
        ApiError::ConfigError("Could not determine XDG data home directory (HOME not set)".to_string())
    })?;
    let canonical = dunce::canonicalize(workspace_root).map_err(|e| {
        ApiError::ConfigError(format!("Failed to canonicalize workspace path: {}", e))
    })?;

    let mut data_dir = data_home.join(APP_DIR);
    for component in canonical.components() {
        if let Component::Normal(name) = component {
            data_dir.push(name);
        }
    }
    Ok(data_dir)
}

/// `$XDG_CONFIG_HOME`, falling back to `$HOME/.config`.
pub fn config_home() -> Result<PathBuf, ApiError> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg_config_home));
    }
    let home = std::env::var("HOME").map_err(|_| {
        ApiError::ConfigError("Could not determine XDG config home directory (HOME not set)".to_string())
    })?;
    Ok(PathBuf::from(home).join(".config"))
}

/// `$XDG_CONFIG_HOME/dropsite/config.toml`
pub fn global_config_path() -> Result<PathBuf, ApiError> {
    Ok(config_home()?.join(APP_DIR).join("config.toml"))
}
