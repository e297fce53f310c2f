//! Tag Store
//!
//! Interns strings to small integer ids. The log holds only the texts; ids are
//! re-derived on open by counting records in write order.

use crate::error::StorageError;
use crate::record::RecordStream;
use crate::types::TagId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Text returned for an id that was never interned
pub const UNKNOWN_TAG: &str = "unknown";

const TAG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TagRecord {
    text: String,
}

/// Tag interning interface
pub trait TagLookup: Send + Sync {
    /// Id of `text`, interning it first if needed
    fn add_or_get(&self, text: &str) -> Result<TagId, StorageError>;

    /// Text for `id`, or [`UNKNOWN_TAG`]
    fn get(&self, id: TagId) -> String;
}

struct TagsInner {
    file: RecordStream<TagRecord>,
    ids: HashMap<String, TagId>,
    texts: HashMap<TagId, String>,
    last_id: TagId,
}

impl TagsInner {
    fn replay(&mut self, records: Vec<TagRecord>) {
        self.ids.clear();
        self.texts.clear();
        self.last_id = 0;
        for record in records {
            self.last_id += 1;
            self.ids.insert(record.text.clone(), self.last_id);
            self.texts.insert(self.last_id, record.text);
        }
    }

    fn persist(&mut self, record: &TagRecord) -> Result<(), StorageError> {
        self.file.append(record)?;
        self.file.flush()
    }

    /// Reload from disk after a failed append, keeping whatever did land
    fn reload(&mut self) -> Result<(), StorageError> {
        let records = self.file.reopen()?;
        self.replay(records);
        Ok(())
    }
}

/// Append-only store of interned strings
pub struct TagStore {
    inner: Mutex<TagsInner>,
}

impl TagStore {
    /// Create an empty tag log at `path`
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        let file = RecordStream::create(path, TAG_SCHEMA_VERSION)?;
        info!(path = %path.display(), "Created tag store");
        Ok(Self {
            inner: Mutex::new(TagsInner {
                file,
                ids: HashMap::new(),
                texts: HashMap::new(),
                last_id: 0,
            }),
        })
    }

    /// Open the tag log at `path` and rebuild both maps
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let (file, records) = RecordStream::<TagRecord>::open(path)?;
        if file.schema_version() != TAG_SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                expected: TAG_SCHEMA_VERSION,
                found: file.schema_version(),
            });
        }

        let mut inner = TagsInner {
            file,
            ids: HashMap::with_capacity(records.len()),
            texts: HashMap::with_capacity(records.len()),
            last_id: 0,
        };
        inner.replay(records);
        info!(path = %path.display(), tags = inner.last_id, "Opened tag store");
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Id of `text`, interning it first if needed.
    ///
    /// A new tag is flushed to disk before its id is returned. A failed
    /// write reopens the log so later calls can proceed.
    pub fn add_or_get(&self, text: &str) -> Result<TagId, StorageError> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.ids.get(text) {
            return Ok(*id);
        }

        let record = TagRecord {
            text: text.to_string(),
        };
        if let Err(err) = inner.persist(&record) {
            warn!(error = %err, "Tag append failed, reopening log");
            if let Err(reopen_err) = inner.reload() {
                error!(error = %reopen_err, "Failed to reopen tag log");
            }
            return Err(err);
        }

        inner.last_id += 1;
        let id = inner.last_id;
        inner.ids.insert(text.to_string(), id);
        inner.texts.insert(id, text.to_string());
        debug!(id, text, "Interned tag");
        Ok(id)
    }

    /// Text for `id`, or [`UNKNOWN_TAG`] if it was never interned
    pub fn get(&self, id: TagId) -> String {
        self.inner
            .lock()
            .texts
            .get(&id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_TAG.to_string())
    }

    /// Snapshot of every interned text
    pub fn tags(&self) -> Vec<String> {
        self.inner.lock().ids.keys().cloned().collect()
    }

    /// Number of interned tags
    pub fn len(&self) -> usize {
        self.inner.lock().texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TagLookup for TagStore {
    fn add_or_get(&self, text: &str) -> Result<TagId, StorageError> {
        TagStore::add_or_get(self, text)
    }

    fn get(&self, id: TagId) -> String {
        TagStore::get(self, id)
    }
}
