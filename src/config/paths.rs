//! Platform directories for config, data and logs.

use crate::error::AppError;
use directories::ProjectDirs;
use std::path::PathBuf;

/// Platform directories for this application
pub fn project_dirs() -> Result<ProjectDirs, AppError> {
    ProjectDirs::from("", "imgvault", "imgvault").ok_or_else(|| {
        AppError::ConfigError("Could not determine platform directories (HOME not set)".to_string())
    })
}

/// Global config file, `<config dir>/config.toml`
pub fn global_config_path() -> Result<PathBuf, AppError> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Library used when neither the command line nor the config names one
pub fn default_library_path() -> Result<PathBuf, AppError> {
    Ok(project_dirs()?.data_dir().join("library"))
}
