//! Environment variable source: DROPSITE__ prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Add the environment overlay, e.g. `DROPSITE__SYNC__POLL_INTERVAL_SECS=60`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix("DROPSITE")
            .separator("__")
            .try_parsing(true),
    ))
}
