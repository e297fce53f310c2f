//! Record Files
//!
//! The on-disk primitives the stores are built on: a keyed file of fixed-size
//! slots and an append-only record log. Both hold an exclusive advisory lock
//! for as long as the handle lives.

pub mod fixed;
pub mod stream;

pub use fixed::FixedFile;
pub use stream::RecordStream;

use crate::error::StorageError;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use uuid::Uuid;

/// A record stored in a [`FixedFile`]
pub trait Record: Serialize + DeserializeOwned {
    /// Largest encoded size a record of this type may take
    const SLOT_PAYLOAD: usize;

    /// Unique key of the record
    fn key(&self) -> Uuid;
}

fn lock_exclusive(file: &File, path: &Path) -> Result<(), StorageError> {
    FileExt::try_lock_exclusive(file).map_err(|_| StorageError::Locked(path.to_path_buf()))
}

fn unlock(file: &File) {
    let _ = FileExt::unlock(file);
}

fn checksum(payload: &[u8]) -> [u8; 32] {
    *blake3::hash(payload).as_bytes()
}
