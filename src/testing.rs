//! Test doubles for the storage seams.
//!
//! `MemoryBlockStore` stands in for the on-disk block store so metadata and
//! library behaviour can be exercised with injected commit failures and
//! simulated data loss.

use crate::error::StorageError;
use crate::store::blocks::BlockStore;
use crate::types::BlockId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    blocks: HashMap<BlockId, Vec<u8>>,
    uncommitted: Vec<BlockId>,
    fail_next_commit: bool,
    reopens: usize,
}

/// In-memory block store. Clones share state, so a test can keep a handle
/// after moving one into a store.
#[derive(Clone, Default)]
pub struct MemoryBlockStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail
    pub fn fail_next_commit(&self) {
        self.state.lock().fail_next_commit = true;
    }

    /// Drop a chain as if its commit never reached disk
    pub fn remove(&self, id: BlockId) -> bool {
        self.state.lock().blocks.remove(&id).is_some()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.state.lock().blocks.contains_key(&id)
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.state.lock().blocks.keys().copied().collect()
    }

    pub fn reopen_count(&self) -> usize {
        self.state.lock().reopens
    }
}

impl BlockStore for MemoryBlockStore {
    fn write(&mut self, data: &[u8]) -> Result<BlockId, StorageError> {
        let id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.blocks.insert(id, data.to_vec());
        state.uncommitted.push(id);
        Ok(id)
    }

    fn read(&self, id: BlockId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.state.lock().blocks.get(&id).cloned())
    }

    fn exists(&self, id: BlockId) -> bool {
        self.contains(id)
    }

    fn delete(&mut self, id: BlockId) -> Result<(), StorageError> {
        self.state.lock().blocks.remove(&id);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(StorageError::CommitFailed("injected commit failure".to_string()));
        }
        state.uncommitted.clear();
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let uncommitted: Vec<_> = state.uncommitted.drain(..).collect();
        for id in uncommitted {
            state.blocks.remove(&id);
        }
        state.reopens += 1;
        Ok(())
    }
}
