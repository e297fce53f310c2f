//! Binary Metadata Store
//!
//! One record per stored file, pointing at the head of its data chain. Adding
//! a file commits the metadata record first and the data second. If the data
//! commit fails the record is deleted again; if the process dies in between,
//! the next open finds the newest record pointing at missing or partial data
//! and drops it. Only the newest record can be in that state, because an add never
//! returns before both commits have finished.

use crate::error::StorageError;
use crate::record::{FixedFile, Record};
use crate::store::blocks::BlockStore;
use crate::types::{BinaryId, BlockId, PathId, TagId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BINARY_SCHEMA_VERSION: u32 = 1;

/// Metadata for one stored file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRecord {
    pub id: BinaryId,
    pub first_data_block_id: BlockId,
    pub original_file_name_tag: TagId,
    pub original_path_tag: TagId,
    /// Write order; the highest index is the newest record
    pub file_index: u64,
    pub name_tag: TagId,
    pub path_id: PathId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date_added: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub original_binary_date: DateTime<Utc>,
}

impl Record for BinaryRecord {
    const SLOT_PAYLOAD: usize = 256;

    fn key(&self) -> Uuid {
        self.id
    }
}

/// Run `action`; if it fails, run `reverse` and return the original error.
///
/// A failing `reverse` is logged and otherwise swallowed.
pub fn with_compensation<T, E: Display>(
    action: impl FnOnce() -> Result<T, E>,
    reverse: impl FnOnce() -> Result<(), E>,
) -> Result<T, E> {
    match action() {
        Ok(value) => Ok(value),
        Err(err) => {
            if let Err(reverse_err) = reverse() {
                error!(error = %reverse_err, "Compensating action failed");
            }
            Err(err)
        }
    }
}

struct BinariesInner<D> {
    file: FixedFile<BinaryRecord>,
    data: D,
    binaries: HashMap<BinaryId, BinaryRecord>,
    next_index: u64,
}

impl<D: BlockStore> BinariesInner<D> {
    fn load(&mut self) -> Result<(), StorageError> {
        self.binaries = self
            .file
            .records()?
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        self.recover()?;
        self.next_index = self.max_file_index() + 1;
        Ok(())
    }

    fn max_file_index(&self) -> u64 {
        self.binaries
            .values()
            .map(|b| b.file_index)
            .max()
            .unwrap_or(0)
    }

    fn recover(&mut self) -> Result<(), StorageError> {
        loop {
            let newest = match self.binaries.values().max_by_key(|b| b.file_index) {
                Some(newest) => newest.clone(),
                None => return Ok(()),
            };
            if self.data.is_complete(newest.first_data_block_id)? {
                return Ok(());
            }
            warn!(
                id = %newest.id,
                file_index = newest.file_index,
                "Removing binary whose data never reached disk"
            );
            self.file.delete(newest.id)?;
            self.file.commit()?;
            self.binaries.remove(&newest.id);
        }
    }

    fn reopen(&mut self) -> Result<(), StorageError> {
        let data_result = self.data.reopen();
        self.file.reopen()?;
        self.load()?;
        data_result
    }

    fn add(&mut self, mut details: BinaryRecord, data: &[u8]) -> Result<BinaryRecord, StorageError> {
        details.file_index = self.next_index;
        self.next_index += 1;
        details.first_data_block_id = self.data.write(data)?;
        self.file.write(&details)?;
        self.file.commit()?;
        self.binaries.insert(details.id, details.clone());

        let Self {
            file, data: store, ..
        } = self;
        with_compensation(
            || store.commit(),
            || {
                file.delete(details.id)?;
                file.commit()
            },
        )?;

        debug!(
            id = %details.id,
            file_index = details.file_index,
            bytes = data.len(),
            "Added binary"
        );
        Ok(details)
    }

    fn delete(&mut self, id: BinaryId) -> Result<(), StorageError> {
        self.file.delete(id)?;
        self.file.commit()?;
        self.binaries.remove(&id);
        debug!(id = %id, "Deleted binary record");
        Ok(())
    }

    fn update(&mut self, details: BinaryRecord) -> Result<(), StorageError> {
        self.file.write(&details)?;
        self.file.commit()?;
        debug!(id = %details.id, "Updated binary record");
        self.binaries.insert(details.id, details);
        Ok(())
    }
}

/// Store of binary metadata records over an injected block store
pub struct BinariesStore<D: BlockStore> {
    inner: Mutex<BinariesInner<D>>,
}

impl<D: BlockStore> BinariesStore<D> {
    /// Create an empty metadata file at `path`
    pub fn create(path: &Path, data: D) -> Result<Self, StorageError> {
        let file = FixedFile::create(path, BINARY_SCHEMA_VERSION)?;
        info!(path = %path.display(), "Created binaries store");
        Ok(Self {
            inner: Mutex::new(BinariesInner {
                file,
                data,
                binaries: HashMap::new(),
                next_index: 1,
            }),
        })
    }

    /// Open the metadata file at `path` and repair an interrupted add
    pub fn open(path: &Path, data: D) -> Result<Self, StorageError> {
        let file = FixedFile::<BinaryRecord>::open(path)?;
        if file.schema_version() != BINARY_SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                expected: BINARY_SCHEMA_VERSION,
                found: file.schema_version(),
            });
        }
        let mut inner = BinariesInner {
            file,
            data,
            binaries: HashMap::new(),
            next_index: 1,
        };
        inner.load()?;
        info!(
            path = %path.display(),
            binaries = inner.binaries.len(),
            next_index = inner.next_index,
            "Opened binaries store"
        );
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Run a mutation on the locked state; on failure reload both files from
    /// disk before returning the original error.
    fn mutate<T>(
        inner: &mut BinariesInner<D>,
        op: impl FnOnce(&mut BinariesInner<D>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let result = op(inner);
        if let Err(err) = &result {
            warn!(error = %err, "Binaries store mutation failed, reopening from disk");
            if let Err(reopen_err) = inner.reopen() {
                error!(error = %reopen_err, "Failed to reopen binaries store");
            }
        }
        result
    }

    /// Store `data` and its metadata. A nil id is replaced with a fresh one;
    /// the file index and data chain head are always assigned here.
    pub fn add(&self, mut details: BinaryRecord, data: &[u8]) -> Result<BinaryRecord, StorageError> {
        if details.id.is_nil() {
            details.id = Uuid::new_v4();
        }
        let mut inner = self.inner.lock();
        if inner.binaries.contains_key(&details.id) {
            return Err(StorageError::DuplicateKey(details.id));
        }
        Self::mutate(&mut inner, |inner| inner.add(details, data))
    }

    pub fn get(&self, id: BinaryId) -> Option<BinaryRecord> {
        self.inner.lock().binaries.get(&id).cloned()
    }

    /// Bytes of the binary `id`, `None` if it is unknown
    pub fn get_data(&self, id: BinaryId) -> Result<Option<Vec<u8>>, StorageError> {
        let inner = self.inner.lock();
        match inner.binaries.get(&id) {
            Some(details) => inner.data.read(details.first_data_block_id),
            None => Ok(None),
        }
    }

    /// Remove the metadata record. The data chain is left in place.
    pub fn delete(&self, id: BinaryId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if !inner.binaries.contains_key(&id) {
            debug!(id = %id, "Delete of unknown binary ignored");
            return Ok(());
        }
        Self::mutate(&mut inner, |inner| inner.delete(id))
    }

    /// Rewrite an existing record
    pub fn update(&self, details: BinaryRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if !inner.binaries.contains_key(&details.id) {
            return Err(StorageError::MissingRecord(details.id));
        }
        Self::mutate(&mut inner, |inner| inner.update(details))
    }

    /// Snapshot of every record
    pub fn binaries(&self) -> Vec<BinaryRecord> {
        self.inner.lock().binaries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().binaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
