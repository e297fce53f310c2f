//! Base layer every load starts from.

use crate::config::VaultConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat};

/// Builder seeded with the serialized defaults, so partial files and
/// environment overrides merge key by key.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = toml::to_string(&VaultConfig::default())
        .map_err(|e| ConfigError::Message(format!("Failed to serialize defaults: {}", e)))?;
    Ok(Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml)))
}
