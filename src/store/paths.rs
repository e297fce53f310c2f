//! Path Store
//!
//! Interns directory paths, each an ordered sequence of tag ids. Matching is
//! exact sequence equality by linear scan; a library holds few distinct
//! folders compared to files.

use crate::error::StorageError;
use crate::record::RecordStream;
use crate::store::tags::TagLookup;
use crate::types::{PathId, TagId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const PATH_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PathRecord {
    tags: Vec<TagId>,
}

struct PathsInner {
    file: RecordStream<PathRecord>,
    paths: Vec<(Vec<TagId>, PathId)>,
    lookup: HashMap<PathId, Vec<TagId>>,
    last_id: PathId,
}

impl PathsInner {
    fn insert(&mut self, tags: Vec<TagId>) -> PathId {
        self.last_id += 1;
        self.lookup.insert(self.last_id, tags.clone());
        self.paths.push((tags, self.last_id));
        self.last_id
    }

    fn persist(&mut self, record: &PathRecord) -> Result<(), StorageError> {
        self.file.append(record)?;
        self.file.flush()
    }

    /// Rebuild from disk after a failed append
    fn reload(&mut self) -> Result<(), StorageError> {
        let records = self.file.reopen()?;
        self.paths.clear();
        self.lookup.clear();
        self.last_id = 0;
        for record in records {
            self.insert(record.tags);
        }
        Ok(())
    }
}

/// Append-only store of interned directory paths
pub struct PathStore {
    tags: Arc<dyn TagLookup>,
    inner: Mutex<PathsInner>,
}

impl PathStore {
    /// Create an empty path log at `path`
    pub fn create(path: &Path, tags: Arc<dyn TagLookup>) -> Result<Self, StorageError> {
        let file = RecordStream::create(path, PATH_SCHEMA_VERSION)?;
        info!(path = %path.display(), "Created path store");
        Ok(Self {
            tags,
            inner: Mutex::new(PathsInner {
                file,
                paths: Vec::new(),
                lookup: HashMap::new(),
                last_id: 0,
            }),
        })
    }

    /// Open the path log at `path` and replay it
    pub fn open(path: &Path, tags: Arc<dyn TagLookup>) -> Result<Self, StorageError> {
        let (file, records) = RecordStream::<PathRecord>::open(path)?;
        if file.schema_version() != PATH_SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                expected: PATH_SCHEMA_VERSION,
                found: file.schema_version(),
            });
        }

        let mut inner = PathsInner {
            file,
            paths: Vec::with_capacity(records.len()),
            lookup: HashMap::with_capacity(records.len()),
            last_id: 0,
        };
        for record in records {
            inner.insert(record.tags);
        }
        info!(path = %path.display(), paths = inner.last_id, "Opened path store");
        Ok(Self {
            tags,
            inner: Mutex::new(inner),
        })
    }

    /// Id of the exact tag sequence, interning it first if needed
    pub fn add_or_get(&self, tags: &[TagId]) -> Result<PathId, StorageError> {
        let mut inner = self.inner.lock();
        if let Some((_, id)) = inner.paths.iter().find(|(known, _)| known.as_slice() == tags) {
            return Ok(*id);
        }

        let record = PathRecord {
            tags: tags.to_vec(),
        };
        if let Err(err) = inner.persist(&record) {
            warn!(error = %err, "Path append failed, reopening log");
            if let Err(reopen_err) = inner.reload() {
                error!(error = %reopen_err, "Failed to reopen path log");
            }
            return Err(err);
        }

        let id = inner.insert(tags.to_vec());
        debug!(id, segments = tags.len(), "Interned path");
        Ok(id)
    }

    /// Intern each segment as a tag, then the resulting sequence
    pub fn add_or_get_names<S: AsRef<str>>(&self, segments: &[S]) -> Result<PathId, StorageError> {
        let tags = segments
            .iter()
            .map(|segment| self.tags.add_or_get(segment.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.add_or_get(&tags)
    }

    /// Tag sequence for `id`
    pub fn get(&self, id: PathId) -> Option<Vec<TagId>> {
        self.inner.lock().lookup.get(&id).cloned()
    }

    /// Segment texts for `id`
    pub fn resolve(&self, id: PathId) -> Option<Vec<String>> {
        let tags = self.get(id)?;
        Some(tags.into_iter().map(|tag| self.tags.get(tag)).collect())
    }

    /// Snapshot of every interned path
    pub fn paths(&self) -> Vec<Vec<TagId>> {
        self.inner
            .lock()
            .paths
            .iter()
            .map(|(tags, _)| tags.clone())
            .collect()
    }
}
