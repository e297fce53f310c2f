//! Configuration
//!
//! Layered settings for the command-line shell: built-in defaults, the global
//! `config.toml`, an optional explicit file, then `IMGVAULT__*` environment
//! variables.

mod facade;
pub mod library;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;
pub use library::LibraryConfig;

use crate::cache::DEFAULT_MAX_LOADED_BINARIES;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Claim cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Resident binaries kept once no claims pin them
    #[serde(default = "default_max_loaded_binaries")]
    pub max_loaded_binaries: usize,
}

fn default_max_loaded_binaries() -> usize {
    DEFAULT_MAX_LOADED_BINARIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_loaded_binaries: default_max_loaded_binaries(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl VaultConfig {
    /// Render as TOML, as written to `config.toml`
    pub fn to_toml(&self) -> Result<String, crate::error::AppError> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::error::AppError::ConfigError(format!("Failed to render config: {}", e)))
    }
}
