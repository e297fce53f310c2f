//! File-level library operations.

use super::adjust::PathAdjuster;
use crate::error::LibraryError;
use crate::store::{BinariesStore, BinaryDataStore, BinaryRecord, BlockStore, PathStore, TagStore};
use crate::types::{BinaryId, NIL_BLOCK};
use crate::validate::FileValidator;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Folder new files land in when the caller gives none
pub const DEFAULT_NEW_FILE_FOLDER: &str = "*New";

/// A stored file with its tags and path resolved to text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    pub id: BinaryId,
    pub name: String,
    pub folder: Vec<String>,
    pub original_name: String,
    pub original_container: String,
    pub file_index: u64,
    pub date_added: DateTime<Utc>,
    pub original_date: DateTime<Utc>,
}

/// Add, delete, move and rename files in one open library.
///
/// Every mutating call has committed its changes by the time it returns.
pub struct LibraryOperations<D: BlockStore = BinaryDataStore> {
    tags: Arc<TagStore>,
    paths: Arc<PathStore>,
    binaries: Arc<BinariesStore<D>>,
    new_file_folder: Vec<String>,
}

impl<D: BlockStore> Clone for LibraryOperations<D> {
    fn clone(&self) -> Self {
        Self {
            tags: self.tags.clone(),
            paths: self.paths.clone(),
            binaries: self.binaries.clone(),
            new_file_folder: self.new_file_folder.clone(),
        }
    }
}

impl<D: BlockStore> LibraryOperations<D> {
    pub fn new(tags: Arc<TagStore>, paths: Arc<PathStore>, binaries: Arc<BinariesStore<D>>) -> Self {
        Self {
            tags,
            paths,
            binaries,
            new_file_folder: vec![DEFAULT_NEW_FILE_FOLDER.to_string()],
        }
    }

    /// Use `folder` for imports that do not name one
    pub fn with_new_file_folder(mut self, folder: Vec<String>) -> Self {
        self.new_file_folder = folder;
        self
    }

    fn require(&self, id: BinaryId) -> Result<BinaryRecord, LibraryError> {
        self.binaries.get(id).ok_or(LibraryError::NotFound(id))
    }

    /// Store `data` as a new file named `name` in `path`.
    ///
    /// `original_container` is recorded as provenance next to the original
    /// name; neither changes on later moves or renames.
    pub fn add_file<S: AsRef<str>>(
        &self,
        data: &[u8],
        name: &str,
        path: &[S],
        original_date: DateTime<Utc>,
        original_container: &str,
    ) -> Result<BinaryRecord, LibraryError> {
        let name_tag = self.tags.add_or_get(name)?;
        let original_path_tag = self.tags.add_or_get(original_container)?;
        let path_id = self.paths.add_or_get_names(path)?;

        let details = BinaryRecord {
            id: Uuid::new_v4(),
            first_data_block_id: NIL_BLOCK,
            original_file_name_tag: name_tag,
            original_path_tag,
            file_index: 0,
            name_tag,
            path_id,
            date_added: Utc::now().trunc_subsecs(3),
            original_binary_date: original_date.trunc_subsecs(3),
        };
        let record = self.binaries.add(details, data)?;
        info!(id = %record.id, name, bytes = data.len(), "Added file");
        Ok(record)
    }

    /// Read, validate and store the file at `path`.
    ///
    /// The stored name is the file stem, the original container is the
    /// parent directory, and `folder` falls back to the new-file folder.
    pub fn add_file_from_path(
        &self,
        path: &Path,
        folder: Option<&[String]>,
        validator: &dyn FileValidator,
    ) -> Result<BinaryRecord, LibraryError> {
        let data = fs::read(path)?;
        if !validator.validate(&data) {
            warn!(path = %path.display(), "File rejected by validator");
            return Err(LibraryError::InvalidFile(path.to_path_buf()));
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let container = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let original_date = fs::metadata(path)?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let folder = folder.unwrap_or(&self.new_file_folder);

        self.add_file(&data, &name, folder, original_date, &container)
    }

    /// Remove the file's metadata record. Its data blocks stay on disk.
    pub fn delete_file(&self, id: BinaryId) -> Result<(), LibraryError> {
        self.require(id)?;
        self.binaries.delete(id)?;
        info!(id = %id, "Deleted file");
        Ok(())
    }

    /// Move the file to `path` under the name `name`
    pub fn move_file<S: AsRef<str>>(
        &self,
        id: BinaryId,
        path: &[S],
        name: &str,
    ) -> Result<(), LibraryError> {
        let mut record = self.require(id)?;
        record.name_tag = self.tags.add_or_get(name)?;
        record.path_id = self.paths.add_or_get_names(path)?;
        self.binaries.update(record)?;
        debug!(id = %id, name, "Moved file");
        Ok(())
    }

    pub fn rename(&self, id: BinaryId, name: &str) -> Result<(), LibraryError> {
        let mut record = self.require(id)?;
        record.name_tag = self.tags.add_or_get(name)?;
        self.binaries.update(record)?;
        debug!(id = %id, name, "Renamed file");
        Ok(())
    }

    /// Snapshot of every metadata record
    pub fn binaries(&self) -> Vec<BinaryRecord> {
        self.binaries.binaries()
    }

    /// Stored bytes of the file `id`
    pub fn binary_data(&self, id: BinaryId) -> Result<Vec<u8>, LibraryError> {
        self.binaries
            .get_data(id)?
            .ok_or(LibraryError::NotFound(id))
    }

    fn entry_for(&self, record: &BinaryRecord) -> LibraryEntry {
        LibraryEntry {
            id: record.id,
            name: self.tags.get(record.name_tag),
            folder: self.paths.resolve(record.path_id).unwrap_or_default(),
            original_name: self.tags.get(record.original_file_name_tag),
            original_container: self.tags.get(record.original_path_tag),
            file_index: record.file_index,
            date_added: record.date_added,
            original_date: record.original_binary_date,
        }
    }

    pub fn entry(&self, id: BinaryId) -> Result<LibraryEntry, LibraryError> {
        let record = self.require(id)?;
        Ok(self.entry_for(&record))
    }

    /// Every file in write order
    pub fn entries(&self) -> Vec<LibraryEntry> {
        let mut records = self.binaries.binaries();
        records.sort_by_key(|r| r.file_index);
        records.iter().map(|r| self.entry_for(r)).collect()
    }

    /// Files whose folder is `folder` or lies beneath it
    pub fn entries_under<S: AsRef<str>>(&self, folder: &[S]) -> Vec<LibraryEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| is_under(&entry.folder, folder))
            .collect()
    }

    /// Move the folder `folder`, with everything beneath it, into
    /// `new_parent`. Returns the number of files moved.
    pub fn move_folder<A: AsRef<str>, B: AsRef<str>>(
        &self,
        folder: &[A],
        new_parent: &[B],
    ) -> Result<usize, LibraryError> {
        let (name, _) = folder.split_last().ok_or(LibraryError::EmptyFolder)?;
        let mut new_root: Vec<String> = new_parent.iter().map(|s| s.as_ref().to_string()).collect();
        new_root.push(name.as_ref().to_string());
        let moved = self.rebase(folder, &PathAdjuster::new(folder, &new_root[..]))?;
        info!(
            from = %join(folder),
            to = %join(&new_root[..]),
            files = moved,
            "Moved folder"
        );
        Ok(moved)
    }

    /// Rename the last segment of `folder`. Returns the number of files moved.
    pub fn rename_folder<S: AsRef<str>>(
        &self,
        folder: &[S],
        new_name: &str,
    ) -> Result<usize, LibraryError> {
        let (_, parent) = folder.split_last().ok_or(LibraryError::EmptyFolder)?;
        let mut new_root: Vec<String> = parent.iter().map(|s| s.as_ref().to_string()).collect();
        new_root.push(new_name.to_string());
        let moved = self.rebase(folder, &PathAdjuster::new(folder, &new_root[..]))?;
        info!(folder = %join(folder), new_name, files = moved, "Renamed folder");
        Ok(moved)
    }

    /// Delete every file in or beneath `folder`. Returns the number deleted.
    pub fn delete_folder<S: AsRef<str>>(&self, folder: &[S]) -> Result<usize, LibraryError> {
        if folder.is_empty() {
            return Err(LibraryError::EmptyFolder);
        }
        let entries = self.entries_under(folder);
        for entry in &entries {
            self.binaries.delete(entry.id)?;
        }
        info!(folder = %join(folder), files = entries.len(), "Deleted folder");
        Ok(entries.len())
    }

    fn rebase<S: AsRef<str>>(
        &self,
        folder: &[S],
        adjuster: &PathAdjuster,
    ) -> Result<usize, LibraryError> {
        let entries = self.entries_under(folder);
        for entry in &entries {
            let path = adjuster.adjust(&entry.folder);
            self.move_file(entry.id, &path[..], &entry.name)?;
        }
        Ok(entries.len())
    }
}

fn is_under<S: AsRef<str>>(path: &[String], folder: &[S]) -> bool {
    path.len() >= folder.len()
        && path
            .iter()
            .zip(folder)
            .all(|(segment, wanted)| segment == wanted.as_ref())
}

fn join<S: AsRef<str>>(path: &[S]) -> String {
    path.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join("/")
}
