//! Global config file source: `<platform config dir>/config.toml`, optional.

use crate::config::paths;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat};
use tracing::debug;

/// Add the global config file if the platform config dir is known.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match paths::global_config_path() {
        Ok(path) => {
            debug!(path = %path.display(), "Layering global config file");
            Ok(builder.add_source(File::from(path).format(FileFormat::Toml).required(false)))
        }
        Err(_) => Ok(builder),
    }
}
