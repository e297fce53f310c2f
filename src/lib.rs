//! imgvault: crash-safe record storage for a personal image library
//!
//! Files, names and folders of an image library are kept in four record
//! files under one directory. Names and folder segments are interned as
//! tags, folders as tag sequences, and file bytes as chains of fixed-size
//! blocks. Adding a file commits its metadata before its data and repairs an
//! interrupted add on the next open.

pub mod cache;
pub mod config;
pub mod error;
pub mod library;
pub mod logging;
pub mod record;
pub mod store;
pub mod testing;
pub mod tooling;
pub mod types;
pub mod validate;

pub use cache::{BinaryClaim, BinarySource, LoadedBinaryCache};
pub use error::{AppError, LibraryError, StorageError};
pub use library::{Library, LibraryEntry, LibraryOperations};
pub use store::{BinariesStore, BinaryDataStore, BinaryRecord, PathStore, TagStore};
