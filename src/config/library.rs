//! LibraryConfig and resolution of the library root.

use super::paths;
use crate::error::AppError;
use crate::library::DEFAULT_NEW_FILE_FOLDER;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_new_file_folder() -> Vec<String> {
    vec![DEFAULT_NEW_FILE_FOLDER.to_string()]
}

/// Library configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Library opened when no root is given on the command line
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Folder that imported files land in
    #[serde(default = "default_new_file_folder")]
    pub new_file_folder: Vec<String>,
}

impl LibraryConfig {
    /// Resolve the library root: explicit argument, then config, then the
    /// platform data directory.
    pub fn resolve_root(&self, cli_root: Option<PathBuf>) -> Result<PathBuf, AppError> {
        if let Some(root) = cli_root {
            return Ok(root);
        }
        match &self.path {
            Some(path) if !path.as_os_str().is_empty() => Ok(path.clone()),
            _ => paths::default_library_path(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: None,
            new_file_folder: default_new_file_folder(),
        }
    }
}
