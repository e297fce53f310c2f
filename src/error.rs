//! Error types
//!
//! Storage errors come from the record files and the stores built on them.
//! Library errors are the named conditions callers present to users.

use crate::types::BinaryId;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by record files and stores
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Invalid file header in {path}: {reason}")]
    BadHeader { path: PathBuf, reason: String },

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("File already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("File is locked by another handle: {0}")]
    Locked(PathBuf),

    #[error("File handle is unusable after a failed commit: {0}")]
    Poisoned(PathBuf),

    #[error("Encoded record is {size} bytes, slot holds {limit}")]
    RecordTooLarge { size: usize, limit: usize },

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: Uuid, reason: String },

    #[error("Data chain starting at {0} is broken")]
    BrokenChain(Uuid),

    #[error("Record already exists: {0}")]
    DuplicateKey(Uuid),

    #[error("Record not found: {0}")]
    MissingRecord(Uuid),

    #[error("Commit failed: {0}")]
    CommitFailed(String),
}

/// Errors surfaced by library-level operations
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Binary {0} not found in library")]
    NotFound(BinaryId),

    #[error("Library root is not empty: {0}")]
    RootNotEmpty(PathBuf),

    #[error("Library root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("Library root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("File rejected by validator: {0}")]
    InvalidFile(PathBuf),

    #[error("Folder operation needs a non-empty folder path")]
    EmptyFolder,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the application shell: configuration, logging and CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Library(LibraryError::Storage(err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}
