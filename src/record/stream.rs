//! Append-only record log
//!
//! A 16 byte header followed by entries of `len | checksum | payload`. Records
//! are replayed in write order on open; a torn tail is cut off so the next
//! append lands on a clean boundary.

use super::{checksum, lock_exclusive, unlock};
use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: &[u8; 4] = b"IMGS";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: u64 = 16;
const ENTRY_HEADER_LEN: usize = 4 + 32;

/// Append-only log of variable-length records
pub struct RecordStream<R> {
    path: PathBuf,
    file: File,
    schema_version: u32,
    end: u64,
    poisoned: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R: Serialize + DeserializeOwned> RecordStream<R> {
    /// Create a new, empty log. Fails if the file already exists.
    pub fn create(path: &Path, schema_version: u32) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_path_buf()),
                _ => StorageError::Io(e),
            })?;
        lock_exclusive(&file, path)?;

        let mut header = [0u8; HEADER_LEN as usize];
        header[0..4].copy_from_slice(MAGIC);
        header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&schema_version.to_le_bytes());
        (&file).write_all(&header)?;
        file.sync_all()?;

        debug!(path = %path.display(), schema_version, "Created record log");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            schema_version,
            end: HEADER_LEN,
            poisoned: false,
            _record: PhantomData,
        })
    }

    /// Open an existing log and replay every intact record in write order.
    pub fn open(path: &Path) -> Result<(Self, Vec<R>), StorageError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        lock_exclusive(&file, path)?;

        let bad_header = |reason: &str| StorageError::BadHeader {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        let mut header = [0u8; HEADER_LEN as usize];
        (&file)
            .read_exact(&mut header)
            .map_err(|_| bad_header("file shorter than header"))?;
        if &header[0..4] != MAGIC {
            return Err(bad_header("bad magic"));
        }
        let format = u16::from_le_bytes([header[4], header[5]]);
        if format != FORMAT_VERSION {
            return Err(bad_header(&format!("unsupported format version {}", format)));
        }
        let schema_version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        let mut stream = Self {
            path: path.to_path_buf(),
            file,
            schema_version,
            end: HEADER_LEN,
            poisoned: false,
            _record: PhantomData,
        };
        let records = stream.replay()?;
        debug!(path = %path.display(), records = records.len(), "Opened record log");
        Ok((stream, records))
    }

    fn replay(&mut self) -> Result<Vec<R>, StorageError> {
        let file_len = self.file.metadata()?.len();
        let mut records = Vec::new();
        let mut offset = HEADER_LEN;
        {
            let mut reader = BufReader::new(&self.file);
            reader.seek(SeekFrom::Start(HEADER_LEN))?;
            let mut entry_header = [0u8; ENTRY_HEADER_LEN];
            while offset + ENTRY_HEADER_LEN as u64 <= file_len {
                reader.read_exact(&mut entry_header)?;
                let len = u32::from_le_bytes([
                    entry_header[0],
                    entry_header[1],
                    entry_header[2],
                    entry_header[3],
                ]) as u64;
                if offset + ENTRY_HEADER_LEN as u64 + len > file_len {
                    break;
                }
                let mut payload = vec![0u8; len as usize];
                reader.read_exact(&mut payload)?;
                if checksum(&payload) != entry_header[4..] {
                    break;
                }
                match bincode::deserialize(&payload) {
                    Ok(record) => records.push(record),
                    Err(_) => break,
                }
                offset += ENTRY_HEADER_LEN as u64 + len;
            }
        }

        if offset < file_len {
            warn!(
                path = %self.path.display(),
                discarded_bytes = file_len - offset,
                "Truncating torn tail of record log"
            );
            self.file.set_len(offset)?;
            self.file.sync_all()?;
        }
        self.end = offset;
        Ok(records)
    }

    /// Path this log was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema version recorded at creation
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Append one record. Durable after [`RecordStream::flush`].
    pub fn append(&mut self, record: &R) -> Result<(), StorageError> {
        if self.poisoned {
            return Err(StorageError::Poisoned(self.path.clone()));
        }
        let payload = bincode::serialize(record)?;
        let mut entry = Vec::with_capacity(ENTRY_HEADER_LEN + payload.len());
        entry.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        entry.extend_from_slice(&checksum(&payload));
        entry.extend_from_slice(&payload);

        let result = (|| -> Result<(), StorageError> {
            let mut file = &self.file;
            file.seek(SeekFrom::Start(self.end))?;
            file.write_all(&entry)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.end += entry.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// Close the OS handle and open the log again, returning every intact
    /// record. Whatever a failed append left past the last intact entry is
    /// cut off.
    pub fn reopen(&mut self) -> Result<Vec<R>, StorageError> {
        let path = self.path.clone();
        self.poisoned = true;
        unlock(&self.file);
        let (stream, records) = Self::open(&path)?;
        *self = stream;
        debug!(path = %path.display(), records = records.len(), "Reopened record log");
        Ok(records)
    }

    #[cfg(test)]
    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Sync appended records to disk
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.poisoned {
            return Err(StorageError::Poisoned(self.path.clone()));
        }
        self.file.sync_data().map_err(|e| {
            self.poisoned = true;
            StorageError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_records_replay_in_write_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log");
        {
            let mut stream = RecordStream::<String>::create(&path, 3).unwrap();
            for word in ["alpha", "beta", "gamma"] {
                stream.append(&word.to_string()).unwrap();
            }
            stream.flush().unwrap();
        }

        let (stream, records) = RecordStream::<String>::open(&path).unwrap();
        assert_eq!(stream.schema_version(), 3);
        assert_eq!(records, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log");
        {
            let mut stream = RecordStream::<String>::create(&path, 1).unwrap();
            stream.append(&"kept".to_string()).unwrap();
            stream.flush().unwrap();
        }
        let intact_len = std::fs::metadata(&path).unwrap().len();
        {
            let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
            raw.write_all(&[200, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        {
            let (mut stream, records) = RecordStream::<String>::open(&path).unwrap();
            assert_eq!(records, vec!["kept"]);
            assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);
            stream.append(&"after".to_string()).unwrap();
            stream.flush().unwrap();
        }

        let (_stream, records) = RecordStream::<String>::open(&path).unwrap();
        assert_eq!(records, vec!["kept", "after"]);
    }

    #[test]
    fn test_reopen_clears_poison_and_cuts_partial_entry() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log");
        let mut stream = RecordStream::<String>::create(&path, 1).unwrap();
        stream.append(&"kept".to_string()).unwrap();
        stream.flush().unwrap();

        // Half an entry reached the file before the failure.
        {
            let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
            raw.write_all(&[40, 0, 0, 0, 9]).unwrap();
        }
        stream.poison();
        assert!(matches!(
            stream.append(&"lost".to_string()),
            Err(StorageError::Poisoned(_))
        ));

        let records = stream.reopen().unwrap();
        assert_eq!(records, vec!["kept"]);
        stream.append(&"after".to_string()).unwrap();
        stream.flush().unwrap();
        drop(stream);

        let (_stream, records) = RecordStream::<String>::open(&path).unwrap();
        assert_eq!(records, vec!["kept", "after"]);
    }

    #[test]
    fn test_second_handle_is_locked_out() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log");
        let _first = RecordStream::<String>::create(&path, 1).unwrap();

        let second = RecordStream::<String>::open(&path);
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }
}
