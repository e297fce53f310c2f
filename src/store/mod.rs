//! Record stores
//!
//! Tags and paths are append-only interning logs. Binary payloads live in a
//! chained block store that the metadata store drives through two-phase adds.

pub mod binaries;
pub mod blocks;
pub mod paths;
pub mod tags;

pub use binaries::{with_compensation, BinariesStore, BinaryRecord};
pub use blocks::{BinaryDataStore, BlockStore, DataBlock, MAX_BLOCK_SIZE};
pub use paths::PathStore;
pub use tags::{TagLookup, TagStore, UNKNOWN_TAG};
