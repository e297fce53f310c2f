//! Library
//!
//! One library is a directory holding four store files. A `Library` owns the
//! stores for as long as it is open and hands out [`LibraryOperations`] for
//! file-level changes.

mod adjust;
mod operations;

pub use adjust::PathAdjuster;
pub use operations::{LibraryEntry, LibraryOperations, DEFAULT_NEW_FILE_FOLDER};

use crate::error::{LibraryError, StorageError};
use crate::store::{BinariesStore, BinaryDataStore, PathStore, TagLookup, TagStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Binary metadata store file
pub const BINARIES_FILE: &str = ".1";
/// Binary data store file
pub const DATA_FILE: &str = ".2";
/// Tag store file
pub const TAGS_FILE: &str = ".3";
/// Path store file
pub const PATHS_FILE: &str = ".4";

/// An open library
pub struct Library {
    root: PathBuf,
    tags: Arc<TagStore>,
    paths: Arc<PathStore>,
    binaries: Arc<BinariesStore<BinaryDataStore>>,
}

impl Library {
    /// Create a new library at `root`.
    ///
    /// The directory is created if missing and must be empty if present. If
    /// any store fails to initialise the directory is removed again.
    pub fn create(root: &Path) -> Result<Self, LibraryError> {
        Self::create_with(root, |root| Self::initialise(root, true))
    }

    fn create_with(
        root: &Path,
        init: impl FnOnce(&Path) -> Result<Self, StorageError>,
    ) -> Result<Self, LibraryError> {
        let root = absolute(root)?;
        if root.is_dir() && fs::read_dir(&root)?.next().is_some() {
            return Err(LibraryError::RootNotEmpty(root));
        }
        fs::create_dir_all(&root)?;

        match init(&root) {
            Ok(library) => {
                info!(root = %root.display(), "Created library");
                Ok(library)
            }
            Err(err) => {
                if let Err(cleanup_err) = fs::remove_dir_all(&root) {
                    warn!(
                        root = %root.display(),
                        error = %cleanup_err,
                        "Failed to remove partially created library"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Open the existing library at `root`
    pub fn open(root: &Path) -> Result<Self, LibraryError> {
        let root = absolute(root)?;
        if root.is_file() {
            return Err(LibraryError::RootNotDirectory(root));
        }
        if !root.is_dir() {
            return Err(LibraryError::RootNotFound(root));
        }

        let library = Self::initialise(&root, false)?;
        info!(
            root = %root.display(),
            binaries = library.binaries.len(),
            tags = library.tags.len(),
            "Opened library"
        );
        Ok(library)
    }

    fn initialise(root: &Path, create: bool) -> Result<Self, StorageError> {
        let tags_path = root.join(TAGS_FILE);
        let tags = Arc::new(if create {
            TagStore::create(&tags_path)?
        } else {
            TagStore::open(&tags_path)?
        });

        let lookup: Arc<dyn TagLookup> = tags.clone();
        let paths_path = root.join(PATHS_FILE);
        let paths = Arc::new(if create {
            PathStore::create(&paths_path, lookup)?
        } else {
            PathStore::open(&paths_path, lookup)?
        });

        let data_path = root.join(DATA_FILE);
        let data = if create {
            BinaryDataStore::create(&data_path)?
        } else {
            BinaryDataStore::open(&data_path)?
        };

        let binaries_path = root.join(BINARIES_FILE);
        let binaries = Arc::new(if create {
            BinariesStore::create(&binaries_path, data)?
        } else {
            BinariesStore::open(&binaries_path, data)?
        });

        Ok(Self {
            root: root.to_path_buf(),
            tags,
            paths,
            binaries,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tags(&self) -> &Arc<TagStore> {
        &self.tags
    }

    pub fn paths(&self) -> &Arc<PathStore> {
        &self.paths
    }

    pub fn binaries(&self) -> &Arc<BinariesStore<BinaryDataStore>> {
        &self.binaries
    }

    /// File operations bound to this library
    pub fn operations(&self) -> LibraryOperations {
        LibraryOperations::new(
            self.tags.clone(),
            self.paths.clone(),
            self.binaries.clone(),
        )
    }
}

fn absolute(path: &Path) -> Result<PathBuf, LibraryError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
