//! MergeService: orchestrates sources, applies merge policy, deserializes to VaultConfig.

use crate::config::sources::{environment, global_file};
use crate::config::VaultConfig;
use config::{ConfigError, File, FileFormat};
use std::path::Path;

use super::merge_policy;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Load config from standard sources.
    /// Precedence: defaults (lowest) -> global file -> environment (highest).
    pub fn load() -> Result<VaultConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = environment::add_to_builder(builder)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load config from a specific file with environment overlay.
    /// The global file is skipped.
    pub fn load_from_file(path: &Path) -> Result<VaultConfig, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let builder = merge_policy::builder_with_defaults()?;
        let builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        let builder = environment::add_to_builder(builder)?;

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nmax_loaded_binaries = 7").unwrap();

        let config = MergeService::load_from_file(file.path()).unwrap();
        assert_eq!(config.cache.max_loaded_binaries, 7);
        assert_eq!(config.library, crate::config::LibraryConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_library_section_is_read() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[library]\npath = \"/srv/pictures\"\nnew_file_folder = [\"Inbox\", \"2014\"]"
        )
        .unwrap();

        let config = MergeService::load_from_file(file.path()).unwrap();
        assert_eq!(
            config.library.path.as_deref(),
            Some(Path::new("/srv/pictures"))
        );
        assert_eq!(config.library.new_file_folder, vec!["Inbox", "2014"]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MergeService::load_from_file(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_defaults_round_trip() {
        let rendered = VaultConfig::default().to_toml().unwrap();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();

        let config = MergeService::load_from_file(file.path()).unwrap();
        assert_eq!(config.cache, crate::config::CacheConfig::default());
    }
}
