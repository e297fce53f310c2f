//! Binary Data Store
//!
//! Stores byte payloads of any length as chains of fixed-capacity blocks.
//! Blocks are written front to back, each pointing at the block written
//! before it, and the id of the last block written is the chain head. Every
//! block records the payload offset at its end, so the head alone sizes the
//! read buffer.
//!
//! The store takes no lock of its own; the metadata store serializes access.

use crate::error::StorageError;
use crate::record::{FixedFile, Record};
use crate::types::{BlockId, NIL_BLOCK};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Most payload bytes one block holds
pub const MAX_BLOCK_SIZE: usize = 10_000;

const BLOCK_SCHEMA_VERSION: u32 = 1;

/// One link of a data chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBlock {
    pub id: BlockId,
    pub bytes: Vec<u8>,
    /// Block written before this one, or [`NIL_BLOCK`]
    pub next_block: BlockId,
    /// Payload offset just past this block's bytes
    pub remaining_bytes: u64,
}

impl Record for DataBlock {
    const SLOT_PAYLOAD: usize = 10_240;

    fn key(&self) -> Uuid {
        self.id
    }
}

/// Chained block storage used by the metadata store
pub trait BlockStore: Send {
    /// Stage `data` as a new chain and return its head id
    fn write(&mut self, data: &[u8]) -> Result<BlockId, StorageError>;

    /// Reassemble the chain starting at `id`; `None` if `id` is unknown
    fn read(&self, id: BlockId) -> Result<Option<Vec<u8>>, StorageError>;

    /// Whether a block with this id is present
    fn exists(&self, id: BlockId) -> bool;

    /// Whether the whole chain starting at `id` reads back. A missing head
    /// or a broken chain is `false`; other read failures are errors.
    fn is_complete(&self, id: BlockId) -> Result<bool, StorageError> {
        match self.read(id) {
            Ok(Some(_)) => Ok(true),
            Ok(None) | Err(StorageError::BrokenChain(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove every block of the chain starting at `id`
    fn delete(&mut self, id: BlockId) -> Result<(), StorageError>;

    /// Make staged writes and deletes durable
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Drop the handle and reload from disk, forgetting uncommitted blocks
    fn reopen(&mut self) -> Result<(), StorageError>;
}

/// Block store backed by a fixed-record file
pub struct BinaryDataStore {
    file: FixedFile<DataBlock>,
    uncommitted: Vec<BlockId>,
}

impl BinaryDataStore {
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        let file = FixedFile::create(path, BLOCK_SCHEMA_VERSION)?;
        info!(path = %path.display(), "Created binary data store");
        Ok(Self {
            file,
            uncommitted: Vec::new(),
        })
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = FixedFile::<DataBlock>::open(path)?;
        if file.schema_version() != BLOCK_SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                expected: BLOCK_SCHEMA_VERSION,
                found: file.schema_version(),
            });
        }
        info!(path = %path.display(), blocks = file.len(), "Opened binary data store");
        Ok(Self {
            file,
            uncommitted: Vec::new(),
        })
    }

    /// Ids of every stored block
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.file.keys()
    }

    /// Ids of every block in the chain starting at `id`, head first
    pub fn chain(&self, id: BlockId) -> Result<Vec<BlockId>, StorageError> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut next = id;
        while next != NIL_BLOCK && seen.insert(next) {
            match self.file.get(next)? {
                Some(block) => {
                    ids.push(next);
                    next = block.next_block;
                }
                None => break,
            }
        }
        Ok(ids)
    }
}

impl BlockStore for BinaryDataStore {
    fn write(&mut self, data: &[u8]) -> Result<BlockId, StorageError> {
        let mut offset = 0;
        let mut id = NIL_BLOCK;
        loop {
            let size = (data.len() - offset).min(MAX_BLOCK_SIZE);
            let block = DataBlock {
                id: Uuid::new_v4(),
                bytes: data[offset..offset + size].to_vec(),
                next_block: id,
                remaining_bytes: (offset + size) as u64,
            };
            self.file.write(&block)?;
            self.uncommitted.push(block.id);
            offset += size;
            id = block.id;
            if offset >= data.len() {
                break;
            }
        }
        debug!(head = %id, bytes = data.len(), "Staged data chain");
        Ok(id)
    }

    fn read(&self, id: BlockId) -> Result<Option<Vec<u8>>, StorageError> {
        let head = id;
        let mut buffer: Option<Vec<u8>> = None;
        let mut expected_end: Option<usize> = None;
        let mut next = id;
        loop {
            let block = match self.file.get(next)? {
                Some(block) => block,
                None if buffer.is_none() => return Ok(None),
                None => return Err(StorageError::BrokenChain(head)),
            };
            let buf = buffer.get_or_insert_with(|| vec![0u8; block.remaining_bytes as usize]);

            // Each block must end exactly where the one after it starts.
            let end = block.remaining_bytes as usize;
            if expected_end.is_some_and(|expected| expected != end) {
                return Err(StorageError::BrokenChain(head));
            }
            let start = match end.checked_sub(block.bytes.len()) {
                Some(start) if end <= buf.len() => start,
                _ => return Err(StorageError::BrokenChain(head)),
            };
            buf[start..end].copy_from_slice(&block.bytes);

            if block.next_block == NIL_BLOCK {
                if start != 0 {
                    return Err(StorageError::BrokenChain(head));
                }
                break;
            }
            if block.bytes.is_empty() {
                return Err(StorageError::BrokenChain(head));
            }
            expected_end = Some(start);
            next = block.next_block;
        }
        Ok(buffer)
    }

    fn exists(&self, id: BlockId) -> bool {
        self.file.contains(id)
    }

    fn delete(&mut self, id: BlockId) -> Result<(), StorageError> {
        // Oldest block first, so a partial delete leaves a readable suffix.
        let ids = self.chain(id)?;
        for block_id in ids.iter().rev() {
            self.file.delete(*block_id)?;
        }
        debug!(head = %id, blocks = ids.len(), "Staged chain deletion");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.file.commit()?;
        self.uncommitted.clear();
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), StorageError> {
        if !self.uncommitted.is_empty() {
            debug!(
                blocks = self.uncommitted.len(),
                "Discarding uncommitted blocks on reopen"
            );
        }
        self.uncommitted.clear();
        self.file.reopen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BinaryDataStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = BinaryDataStore::create(&temp_dir.path().join(".2")).unwrap();
        (temp_dir, store)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_payload_sizes_round_trip() {
        let (_temp, mut store) = setup();
        for len in [
            0,
            1,
            MAX_BLOCK_SIZE - 1,
            MAX_BLOCK_SIZE,
            MAX_BLOCK_SIZE + 1,
            MAX_BLOCK_SIZE * 3,
            MAX_BLOCK_SIZE * 2 + 17,
        ] {
            let data = payload(len);
            let id = store.write(&data).unwrap();
            store.commit().unwrap();
            assert_eq!(store.read(id).unwrap(), Some(data), "payload of {} bytes", len);
        }
    }

    #[test]
    fn test_chain_head_is_last_written_block() {
        let (_temp, mut store) = setup();
        let data = payload(MAX_BLOCK_SIZE * 2 + 5);
        let id = store.write(&data).unwrap();
        store.commit().unwrap();

        let chain = store.chain(id).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0], id);

        let head = store.file.get(id).unwrap().unwrap();
        assert_eq!(head.remaining_bytes, data.len() as u64);
        assert_eq!(head.bytes.len(), 5);
        let tail = store.file.get(chain[2]).unwrap().unwrap();
        assert_eq!(tail.next_block, NIL_BLOCK);
        assert_eq!(tail.remaining_bytes, MAX_BLOCK_SIZE as u64);
    }

    #[test]
    fn test_missing_data_reads_none() {
        let (_temp, store) = setup();
        let id = Uuid::new_v4();
        assert_eq!(store.read(id).unwrap(), None);
        assert!(!store.exists(id));
    }

    #[test]
    fn test_existing_data_is_found() {
        let (_temp, mut store) = setup();
        let id = store.write(&payload(10)).unwrap();
        store.commit().unwrap();
        assert!(store.exists(id));
    }

    #[test]
    fn test_delete_removes_whole_chain() {
        let (_temp, mut store) = setup();
        let keep = store.write(&payload(3)).unwrap();
        let id = store.write(&payload(MAX_BLOCK_SIZE * 2 + 1)).unwrap();
        store.commit().unwrap();

        store.delete(id).unwrap();
        store.commit().unwrap();

        assert!(!store.exists(id));
        assert_eq!(store.read(id).unwrap(), None);
        assert_eq!(store.block_ids(), vec![keep]);
    }

    #[test]
    fn test_reopen_forgets_uncommitted_blocks() {
        let (_temp, mut store) = setup();
        let committed = store.write(&payload(20)).unwrap();
        store.commit().unwrap();
        let uncommitted = store.write(&payload(MAX_BLOCK_SIZE + 20)).unwrap();
        assert!(store.exists(uncommitted));

        store.reopen().unwrap();

        assert!(!store.exists(uncommitted));
        assert_eq!(store.read(committed).unwrap(), Some(payload(20)));
        assert_eq!(store.block_ids().len(), 1);
    }

    #[test]
    fn test_broken_chain_is_reported() {
        let (_temp, mut store) = setup();
        let id = store.write(&payload(MAX_BLOCK_SIZE * 2)).unwrap();
        store.commit().unwrap();
        let tail = store.chain(id).unwrap()[1];
        store.file.delete(tail).unwrap();
        store.commit().unwrap();

        assert!(matches!(store.read(id), Err(StorageError::BrokenChain(_))));
    }

    #[test]
    fn test_chain_missing_older_blocks_is_incomplete() {
        let (_temp, mut store) = setup();
        let whole = store.write(&payload(MAX_BLOCK_SIZE + 1)).unwrap();
        let id = store.write(&payload(MAX_BLOCK_SIZE * 3)).unwrap();
        store.commit().unwrap();
        assert!(store.is_complete(id).unwrap());

        // Head live, older links gone.
        for older in store.chain(id).unwrap().into_iter().skip(1) {
            store.file.delete(older).unwrap();
        }
        store.commit().unwrap();

        assert!(store.exists(id));
        assert!(!store.is_complete(id).unwrap());
        assert!(store.is_complete(whole).unwrap());
        assert!(!store.is_complete(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn test_blocks_survive_reopen_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".2");
        let data = payload(MAX_BLOCK_SIZE * 4 + 99);
        let id = {
            let mut store = BinaryDataStore::create(&path).unwrap();
            let id = store.write(&data).unwrap();
            store.commit().unwrap();
            id
        };

        let store = BinaryDataStore::open(&path).unwrap();
        assert_eq!(store.read(id).unwrap(), Some(data));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_write_then_read_returns_payload(data in proptest::collection::vec(any::<u8>(), 0..35_000)) {
            let (_temp, mut store) = setup();
            let id = store.write(&data).unwrap();
            store.commit().unwrap();
            prop_assert_eq!(store.read(id).unwrap(), Some(data));
        }
    }
}
