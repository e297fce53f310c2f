//! Loaded-Binary Claim Cache
//!
//! Bounds how many decoded binaries stay in memory. A buffer is resident from
//! its first claim until capacity pressure evicts it, and it is never evicted
//! while any claim on it is outstanding. When claims outnumber the capacity
//! the cache stays over capacity until enough of them are released.
//!
//! Eviction picks any resident buffer without claims; no recency order is
//! kept.

use crate::error::StorageError;
use crate::store::{BinariesStore, BlockStore};
use crate::types::BinaryId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, trace};

/// Resident buffers kept when no capacity is configured
pub const DEFAULT_MAX_LOADED_BINARIES: usize = 100;

/// Where the cache fetches bytes on a first claim
pub trait BinarySource: Send + Sync {
    /// Bytes of binary `id`, `None` if the source does not know it
    fn load(&self, id: BinaryId) -> Result<Option<Vec<u8>>, StorageError>;
}

impl<D: BlockStore> BinarySource for BinariesStore<D> {
    fn load(&self, id: BinaryId) -> Result<Option<Vec<u8>>, StorageError> {
        self.get_data(id)
    }
}

impl<T: BinarySource + ?Sized> BinarySource for Arc<T> {
    fn load(&self, id: BinaryId) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).load(id)
    }
}

#[derive(Default)]
struct CacheState {
    buffers: HashMap<BinaryId, Arc<[u8]>>,
    claims: HashMap<BinaryId, usize>,
}

impl CacheState {
    fn trim(&mut self, capacity: usize) {
        while self.buffers.len() > capacity {
            let victim = self
                .buffers
                .keys()
                .find(|id| !self.claims.contains_key(id))
                .copied();
            match victim {
                Some(id) => {
                    self.buffers.remove(&id);
                    trace!(id = %id, "Evicted binary");
                }
                None => break,
            }
        }
    }
}

struct Shared {
    state: Mutex<CacheState>,
    capacity: usize,
}

impl Shared {
    fn release(&self, id: BinaryId) {
        let mut state = self.state.lock();
        let remaining = match state.claims.get_mut(&id) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => return,
        };
        if remaining == 0 {
            state.claims.remove(&id);
            state.trim(self.capacity);
        }
    }
}

/// Claim-counted cache of binary payloads
pub struct LoadedBinaryCache<S: BinarySource> {
    source: S,
    shared: Arc<Shared>,
}

impl<S: BinarySource> LoadedBinaryCache<S> {
    pub fn new(capacity: usize, source: S) -> Self {
        Self {
            source,
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState::default()),
                capacity,
            }),
        }
    }

    /// Claim binary `id`, loading it on first use.
    ///
    /// Returns `Ok(None)` without caching anything if the source does not
    /// know `id`.
    pub fn get_binary(&self, id: BinaryId) -> Result<Option<BinaryClaim>, StorageError> {
        let mut state = self.shared.state.lock();
        let bytes = match state.buffers.get(&id) {
            Some(bytes) => bytes.clone(),
            None => match self.source.load(id)? {
                Some(data) => {
                    let bytes: Arc<[u8]> = data.into();
                    state.buffers.insert(id, bytes.clone());
                    debug!(id = %id, bytes = bytes.len(), "Loaded binary into cache");
                    bytes
                }
                None => return Ok(None),
            },
        };
        *state.claims.entry(id).or_insert(0) += 1;
        state.trim(self.shared.capacity);

        Ok(Some(BinaryClaim {
            id,
            bytes,
            shared: self.shared.clone(),
        }))
    }

    /// Resident buffer count, which may exceed the capacity
    pub fn num_items(&self) -> usize {
        self.shared.state.lock().buffers.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Outstanding claims on `id`
    pub fn claim_count(&self, id: BinaryId) -> usize {
        self.shared.state.lock().claims.get(&id).copied().unwrap_or(0)
    }
}

/// A pinned binary buffer. Dropping the claim releases it.
pub struct BinaryClaim {
    id: BinaryId,
    bytes: Arc<[u8]>,
    shared: Arc<Shared>,
}

impl BinaryClaim {
    pub fn id(&self) -> BinaryId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the buffer, usable after the claim is released
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        self.bytes.clone()
    }
}

impl Deref for BinaryClaim {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Clone for BinaryClaim {
    /// A clone is a second claim on the same buffer
    fn clone(&self) -> Self {
        *self.shared.state.lock().claims.entry(self.id).or_insert(0) += 1;
        Self {
            id: self.id,
            bytes: self.bytes.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl Drop for BinaryClaim {
    fn drop(&mut self) {
        self.shared.release(self.id);
    }
}

impl fmt::Debug for BinaryClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryClaim")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .finish()
    }
}
