//! CLI Tooling
//!
//! Command-line interface over one library. Each invocation opens the
//! library, runs one command and closes it again; every mutating command has
//! committed by the time it prints.

use crate::cache::LoadedBinaryCache;
use crate::config::{ConfigLoader, VaultConfig};
use crate::error::{AppError, LibraryError};
use crate::library::{Library, LibraryEntry, LibraryOperations};
use crate::logging::LoggingConfig;
use crate::types::BinaryId;
use crate::validate::{AcceptAll, FileValidator, ImageFormat, ImageValidator};
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// imgvault CLI - crash-safe storage for a personal image library
#[derive(Parser)]
#[command(name = "imgvault")]
#[command(about = "Crash-safe record storage for a personal image library")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Library root directory (default: library.path from config)
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line logging overrides on top of the configured section
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        if self.verbose {
            config.level = "debug".to_string();
            config.output = "stderr".to_string();
        }
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new, empty library
    Create,
    /// Import files into the library
    Add {
        /// Files to import
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Target folder, segments separated by '/' (default: library.new_file_folder)
        #[arg(long)]
        folder: Option<String>,
        /// Skip the image signature check
        #[arg(long)]
        any: bool,
    },
    /// List stored files
    List {
        /// Only files in or beneath this folder
        #[arg(long)]
        folder: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show one stored file
    Show {
        id: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Write stored files out to a directory
    Export {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Destination directory
        #[arg(long, short)]
        output_dir: PathBuf,
    },
    /// Rename a stored file
    Rename { id: String, name: String },
    /// Move a stored file to another folder
    Move {
        id: String,
        /// Target folder, segments separated by '/'
        #[arg(long)]
        folder: String,
        /// New name (default: keep the current name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a stored file
    Delete { id: String },
    /// Move a folder and everything beneath it under a new parent
    MoveFolder { folder: String, new_parent: String },
    /// Rename the last segment of a folder
    RenameFolder { folder: String, new_name: String },
    /// Delete every file in or beneath a folder
    DeleteFolder { folder: String },
    /// List interned tags
    Tags {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration as TOML
    Config,
}

/// CLI context: resolved configuration and library root
pub struct CliContext {
    config: VaultConfig,
    library_root: PathBuf,
}

impl CliContext {
    /// Create a new CLI context
    pub fn new(library: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<Self, AppError> {
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        Self::with_config(library, config)
    }

    /// Create a context from an already loaded configuration
    pub fn with_config(library: Option<PathBuf>, config: VaultConfig) -> Result<Self, AppError> {
        let library_root = config.library.resolve_root(library)?;
        Ok(Self {
            config,
            library_root,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    fn open(&self) -> Result<(Library, LibraryOperations), AppError> {
        let library = Library::open(&self.library_root)?;
        let ops = library
            .operations()
            .with_new_file_folder(self.config.library.new_file_folder.clone());
        Ok((library, ops))
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> Result<String, AppError> {
        match command {
            Commands::Create => {
                Library::create(&self.library_root)?;
                Ok(format!("Created library at {}", self.library_root.display()))
            }
            Commands::Config => self.config.to_toml(),
            Commands::Add { files, folder, any } => self.handle_add(files, folder.as_deref(), *any),
            Commands::List { folder, format } => self.handle_list(folder.as_deref(), format),
            Commands::Show { id, format } => self.handle_show(id, format),
            Commands::Export { ids, output_dir } => self.handle_export(ids, output_dir),
            Commands::Rename { id, name } => {
                let (_library, ops) = self.open()?;
                let id = parse_id(id)?;
                ops.rename(id, name)?;
                Ok(format!("Renamed {} to {}", id, name))
            }
            Commands::Move { id, folder, name } => {
                let (_library, ops) = self.open()?;
                let id = parse_id(id)?;
                let name = match name {
                    Some(name) => name.clone(),
                    None => ops.entry(id)?.name,
                };
                let folder = parse_folder(folder);
                ops.move_file(id, &folder, &name)?;
                Ok(format!("Moved {} to {}/{}", id, folder.join("/"), name))
            }
            Commands::Delete { id } => {
                let (_library, ops) = self.open()?;
                let id = parse_id(id)?;
                ops.delete_file(id)?;
                Ok(format!("Deleted {}", id))
            }
            Commands::MoveFolder { folder, new_parent } => {
                let (_library, ops) = self.open()?;
                let moved = ops.move_folder(&parse_folder(folder), &parse_folder(new_parent))?;
                Ok(format!("Moved {} file(s)", moved))
            }
            Commands::RenameFolder { folder, new_name } => {
                let (_library, ops) = self.open()?;
                let moved = ops.rename_folder(&parse_folder(folder), new_name)?;
                Ok(format!("Renamed folder, {} file(s) updated", moved))
            }
            Commands::DeleteFolder { folder } => {
                let (_library, ops) = self.open()?;
                let deleted = ops.delete_folder(&parse_folder(folder))?;
                Ok(format!("Deleted {} file(s)", deleted))
            }
            Commands::Tags { format } => {
                let (library, _ops) = self.open()?;
                let mut tags = library.tags().tags();
                tags.sort();
                match format.as_str() {
                    "json" => to_json(&json!({ "tags": tags, "total": tags.len() })),
                    _ => Ok(tags.join("\n")),
                }
            }
        }
    }

    fn handle_add(
        &self,
        files: &[PathBuf],
        folder: Option<&str>,
        any: bool,
    ) -> Result<String, AppError> {
        let (_library, ops) = self.open()?;
        let validator: &dyn FileValidator = if any { &AcceptAll } else { &ImageValidator };
        let folder = folder.map(parse_folder);

        let mut lines = Vec::with_capacity(files.len());
        for file in files {
            match ops.add_file_from_path(file, folder.as_deref(), validator) {
                Ok(record) => lines.push(format!("Added {} {}", record.id, file.display())),
                Err(LibraryError::InvalidFile(path)) => {
                    warn!(path = %path.display(), "Skipped file that is not a recognised image");
                    lines.push(format!("Skipped {} (not a recognised image)", path.display()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(lines.join("\n"))
    }

    fn handle_list(&self, folder: Option<&str>, format: &str) -> Result<String, AppError> {
        let (_library, ops) = self.open()?;
        let entries = match folder {
            Some(folder) => ops.entries_under(&parse_folder(folder)),
            None => ops.entries(),
        };
        match format {
            "json" => to_json(&json!({ "files": entries, "total": entries.len() })),
            "text" => Ok(format_entries_table(&entries)),
            other => Err(AppError::InvalidArgument(format!(
                "Unknown format: {} (must be 'text' or 'json')",
                other
            ))),
        }
    }

    fn handle_show(&self, id: &str, format: &str) -> Result<String, AppError> {
        let (_library, ops) = self.open()?;
        let id = parse_id(id)?;
        let entry = ops.entry(id)?;
        let data = ops.binary_data(id)?;
        let kind = ImageFormat::detect(&data);

        if format == "json" {
            return to_json(&json!({
                "file": entry,
                "size": data.len(),
                "format": kind,
            }));
        }
        let mut output = format!("Id: {}\n", entry.id);
        output.push_str(&format!("Name: {}\n", entry.name));
        output.push_str(&format!("Folder: {}\n", entry.folder.join("/")));
        output.push_str(&format!("Size: {} bytes\n", data.len()));
        if let Some(kind) = kind {
            output.push_str(&format!("Format: {}\n", kind));
        }
        output.push_str(&format!("Added: {}\n", entry.date_added.to_rfc3339()));
        output.push_str(&format!(
            "Original: {}/{} ({})",
            entry.original_container,
            entry.original_name,
            entry.original_date.to_rfc3339()
        ));
        Ok(output)
    }

    fn handle_export(&self, ids: &[String], output_dir: &Path) -> Result<String, AppError> {
        let (library, ops) = self.open()?;
        let cache = LoadedBinaryCache::new(
            self.config.cache.max_loaded_binaries,
            library.binaries().clone(),
        );
        fs::create_dir_all(output_dir)?;

        let mut lines = Vec::with_capacity(ids.len());
        for id in ids {
            let id = parse_id(id)?;
            let entry = ops.entry(id)?;
            let claim = cache
                .get_binary(id)?
                .ok_or(LibraryError::NotFound(id))?;
            let extension = ImageFormat::detect(&claim)
                .map(|kind| kind.to_string())
                .unwrap_or_else(|| "bin".to_string());
            let target = output_dir.join(export_file_name(&entry.name, id, &extension));
            fs::write(&target, &*claim)?;
            info!(id = %id, target = %target.display(), "Exported file");
            lines.push(format!("Exported {} to {}", id, target.display()));
        }
        Ok(lines.join("\n"))
    }
}

fn parse_id(id: &str) -> Result<BinaryId, AppError> {
    Uuid::parse_str(id).map_err(|e| AppError::InvalidArgument(format!("Invalid id {}: {}", id, e)))
}

/// Split `a/b/c` into folder segments; empty segments are dropped
fn parse_folder(folder: &str) -> Vec<String> {
    folder
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// File name for an exported binary: the stored name with path separators
/// replaced, then the id, so names never collide or leave the target directory
fn export_file_name(name: &str, id: BinaryId, extension: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        format!("{}.{}", id, extension)
    } else {
        format!("{}-{}.{}", stem, id, extension)
    }
}

fn to_json(value: &serde_json::Value) -> Result<String, AppError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| AppError::InvalidArgument(format!("Failed to render JSON: {}", e)))
}

fn format_entries_table(entries: &[LibraryEntry]) -> String {
    if entries.is_empty() {
        return "No files in library.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Id", "Name", "Folder", "Added", "Original"]);
    for entry in entries {
        table.add_row(vec![
            entry.id.to_string(),
            entry.name.clone(),
            entry.folder.join("/"),
            entry.date_added.format("%Y-%m-%d %H:%M").to_string(),
            entry.original_name.clone(),
        ]);
    }
    format!("{}\n\nTotal: {} file(s)", table, entries.len())
}
