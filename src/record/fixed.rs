//! Keyed fixed-slot record file
//!
//! Layout: a 32 byte header followed by slots of identical size. Each slot is
//! `state | generation | key | len | checksum | payload`.
//!
//! Writes and deletes are buffered until [`FixedFile::commit`]. A commit stages
//! every new slot, syncs, flips the staged slots live in write order, syncs,
//! then frees the slots they supersede. A live slot is never overwritten in place, so a crash
//! at any point leaves either the old or the new version of each record.

use super::{checksum, lock_exclusive, unlock, Record};
use crate::error::StorageError;
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const MAGIC: &[u8; 4] = b"IMGF";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: u64 = 32;
const SLOT_HEADER_LEN: usize = 1 + 8 + 16 + 4 + 32;

const SLOT_FREE: u8 = 0;
const SLOT_STAGED: u8 = 1;
const SLOT_LIVE: u8 = 2;

struct SlotHeader {
    state: u8,
    generation: u64,
    key: Uuid,
    len: u32,
    checksum: [u8; 32],
}

impl SlotHeader {
    fn encode(&self) -> [u8; SLOT_HEADER_LEN] {
        let mut buf = [0u8; SLOT_HEADER_LEN];
        buf[0] = self.state;
        buf[1..9].copy_from_slice(&self.generation.to_le_bytes());
        buf[9..25].copy_from_slice(self.key.as_bytes());
        buf[25..29].copy_from_slice(&self.len.to_le_bytes());
        buf[29..61].copy_from_slice(&self.checksum);
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        let mut generation = [0u8; 8];
        generation.copy_from_slice(&buf[1..9]);
        let mut key = [0u8; 16];
        key.copy_from_slice(&buf[9..25]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[25..29]);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&buf[29..61]);
        SlotHeader {
            state: buf[0],
            generation: u64::from_le_bytes(generation),
            key: Uuid::from_bytes(key),
            len: u32::from_le_bytes(len),
            checksum,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotRef {
    number: u64,
    generation: u64,
}

enum Pending {
    Upsert(Vec<u8>),
    Delete,
}

/// Keyed file of fixed-size record slots
pub struct FixedFile<R: Record> {
    path: PathBuf,
    file: File,
    schema_version: u32,
    index: HashMap<Uuid, SlotRef>,
    free: BTreeSet<u64>,
    slot_count: u64,
    generation: u64,
    /// Buffered changes keyed by record, tagged with their write sequence
    pending: HashMap<Uuid, (u64, Pending)>,
    next_seq: u64,
    poisoned: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> FixedFile<R> {
    fn slot_len() -> u64 {
        (SLOT_HEADER_LEN + R::SLOT_PAYLOAD) as u64
    }

    fn slot_offset(number: u64) -> u64 {
        HEADER_LEN + number * Self::slot_len()
    }

    /// Create a new, empty record file. Fails if the file already exists.
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
        header[12..16].copy_from_slice(&(R::SLOT_PAYLOAD as u32).to_le_bytes());
        (&file).write_all(&header)?;
        file.sync_all()?;

        debug!(path = %path.display(), schema_version, "Created record file");
        Ok(Self::from_parts(path, file, schema_version))
    }

    /// Open an existing record file and index its live slots.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
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
        let slot_payload = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
        if slot_payload as usize != R::SLOT_PAYLOAD {
            return Err(bad_header(&format!(
                "slot payload {} does not match record type ({})",
                slot_payload,
                R::SLOT_PAYLOAD
            )));
        }

        let mut this = Self::from_parts(path, file, schema_version);
        this.scan()?;
        debug!(
            path = %path.display(),
            records = this.index.len(),
            slots = this.slot_count,
            "Opened record file"
        );
        Ok(this)
    }

    fn from_parts(path: &Path, file: File, schema_version: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            schema_version,
            index: HashMap::new(),
            free: BTreeSet::new(),
            slot_count: 0,
            generation: 0,
            pending: HashMap::new(),
            next_seq: 0,
            poisoned: false,
            _record: PhantomData,
        }
    }

    fn scan(&mut self) -> Result<(), StorageError> {
        let file_len = self.file.metadata()?.len();
        self.slot_count = file_len.saturating_sub(HEADER_LEN) / Self::slot_len();

        // Live slots that lost to a newer generation of the same key.
        let mut stale = Vec::new();
        {
            let mut reader = BufReader::new(&self.file);
            reader.seek(SeekFrom::Start(HEADER_LEN))?;
            let mut buf = [0u8; SLOT_HEADER_LEN];
            for number in 0..self.slot_count {
                reader.read_exact(&mut buf)?;
                reader.seek_relative(R::SLOT_PAYLOAD as i64)?;
                let header = SlotHeader::decode(&buf);
                if header.state != SLOT_LIVE {
                    self.free.insert(number);
                    continue;
                }
                self.generation = self.generation.max(header.generation);
                let candidate = SlotRef {
                    number,
                    generation: header.generation,
                };
                match self.index.get(&header.key).copied() {
                    None => {
                        self.index.insert(header.key, candidate);
                    }
                    Some(existing) if existing.generation < candidate.generation => {
                        stale.push(existing.number);
                        self.index.insert(header.key, candidate);
                    }
                    Some(_) => stale.push(number),
                }
            }
        }

        if !stale.is_empty() {
            warn!(
                path = %self.path.display(),
                slots = stale.len(),
                "Releasing superseded slots left by an interrupted commit"
            );
            for number in &stale {
                self.write_state(*number, SLOT_FREE)?;
            }
            self.file.sync_data()?;
            self.free.extend(stale);
        }
        Ok(())
    }

    /// Path this file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema version recorded at creation
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    fn check_usable(&self) -> Result<(), StorageError> {
        if self.poisoned {
            return Err(StorageError::Poisoned(self.path.clone()));
        }
        Ok(())
    }

    /// Upsert a record by key. Visible immediately, durable after commit.
    pub fn write(&mut self, record: &R) -> Result<(), StorageError> {
        self.check_usable()?;
        let bytes = bincode::serialize(record)?;
        if bytes.len() > R::SLOT_PAYLOAD {
            return Err(StorageError::RecordTooLarge {
                size: bytes.len(),
                limit: R::SLOT_PAYLOAD,
            });
        }
        self.stage(record.key(), Pending::Upsert(bytes));
        Ok(())
    }

    /// Remove a record by key. Missing keys are ignored.
    pub fn delete(&mut self, key: Uuid) -> Result<(), StorageError> {
        self.check_usable()?;
        if self.index.contains_key(&key) {
            self.stage(key, Pending::Delete);
        } else {
            self.pending.remove(&key);
        }
        Ok(())
    }

    fn stage(&mut self, key: Uuid, op: Pending) {
        self.next_seq += 1;
        self.pending.insert(key, (self.next_seq, op));
    }

    /// Whether a record with this key is present, committed or pending
    pub fn contains(&self, key: Uuid) -> bool {
        match self.pending.get(&key) {
            Some((_, Pending::Upsert(_))) => true,
            Some((_, Pending::Delete)) => false,
            None => self.index.contains_key(&key),
        }
    }

    /// Keys of every record, pending changes included
    pub fn keys(&self) -> Vec<Uuid> {
        let mut keys: Vec<Uuid> = self
            .index
            .keys()
            .filter(|key| !self.pending.contains_key(key))
            .copied()
            .collect();
        keys.extend(self.pending.iter().filter_map(|(key, (_, op))| match op {
            Pending::Upsert(_) => Some(*key),
            Pending::Delete => None,
        }));
        keys
    }

    /// Number of records, pending changes included
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a record by key
    pub fn get(&self, key: Uuid) -> Result<Option<R>, StorageError> {
        self.check_usable()?;
        match self.pending.get(&key) {
            Some((_, Pending::Upsert(bytes))) => return Ok(Some(bincode::deserialize(bytes)?)),
            Some((_, Pending::Delete)) => return Ok(None),
            None => {}
        }
        match self.index.get(&key) {
            Some(slot) => self.read_slot(key, slot.number).map(Some),
            None => Ok(None),
        }
    }

    /// Every record in the file, pending changes included
    pub fn records(&self) -> Result<Vec<R>, StorageError> {
        self.check_usable()?;
        let mut committed: Vec<(u64, Uuid)> = self
            .index
            .iter()
            .filter(|(key, _)| !self.pending.contains_key(key))
            .map(|(key, slot)| (slot.number, *key))
            .collect();
        committed.sort_unstable();

        let mut records = Vec::with_capacity(committed.len() + self.pending.len());
        for (number, key) in committed {
            records.push(self.read_slot(key, number)?);
        }
        let mut upserts: Vec<&(u64, Pending)> = self.pending.values().collect();
        upserts.sort_unstable_by_key(|(seq, _)| *seq);
        for (_, op) in upserts {
            if let Pending::Upsert(bytes) = op {
                records.push(bincode::deserialize(bytes)?);
            }
        }
        Ok(records)
    }

    fn read_slot(&self, key: Uuid, number: u64) -> Result<R, StorageError> {
        let mut buf = vec![0u8; Self::slot_len() as usize];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(Self::slot_offset(number)))?;
        file.read_exact(&mut buf)?;

        let header = SlotHeader::decode(&buf[..SLOT_HEADER_LEN]);
        let corrupt = |reason: &str| StorageError::Corrupt {
            key,
            reason: reason.to_string(),
        };
        if header.state != SLOT_LIVE || header.key != key {
            return Err(corrupt("slot no longer holds this record"));
        }
        let len = header.len as usize;
        if len > R::SLOT_PAYLOAD {
            return Err(corrupt("payload length exceeds slot"));
        }
        let payload = &buf[SLOT_HEADER_LEN..SLOT_HEADER_LEN + len];
        if checksum(payload) != header.checksum {
            return Err(corrupt("checksum mismatch"));
        }
        Ok(bincode::deserialize(payload)?)
    }

    fn write_slot(
        &self,
        number: u64,
        generation: u64,
        key: Uuid,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        let header = SlotHeader {
            state: SLOT_STAGED,
            generation,
            key,
            len: payload.len() as u32,
            checksum: checksum(payload),
        };
        let mut buf = vec![0u8; Self::slot_len() as usize];
        buf[..SLOT_HEADER_LEN].copy_from_slice(&header.encode());
        buf[SLOT_HEADER_LEN..SLOT_HEADER_LEN + payload.len()].copy_from_slice(payload);

        let mut file = &self.file;
        file.seek(SeekFrom::Start(Self::slot_offset(number)))?;
        file.write_all(&buf)?;
        Ok(())
    }

    fn write_state(&self, number: u64, state: u8) -> Result<(), StorageError> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(Self::slot_offset(number)))?;
        file.write_all(&[state])?;
        Ok(())
    }

    /// Make every pending write and delete durable.
    ///
    /// A failed commit leaves the handle poisoned; call [`FixedFile::reopen`]
    /// to continue from what reached the disk.
    pub fn commit(&mut self) -> Result<(), StorageError> {
        self.check_usable()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let result = self.apply(pending);
        if let Err(e) = &result {
            warn!(path = %self.path.display(), error = %e, "Commit failed, handle poisoned");
            self.poisoned = true;
        }
        result
    }

    fn apply(&mut self, pending: HashMap<Uuid, (u64, Pending)>) -> Result<(), StorageError> {
        let generation = self.generation + 1;
        let mut free = self.free.clone();
        let mut next_slot = self.slot_count;
        let mut staged: Vec<(Uuid, u64)> = Vec::new();
        let mut released: Vec<u64> = Vec::new();
        let mut removed: Vec<Uuid> = Vec::new();

        // Write order: a record written after another never goes live first.
        let mut ops: Vec<(u64, Uuid, Pending)> = pending
            .into_iter()
            .map(|(key, (seq, op))| (seq, key, op))
            .collect();
        ops.sort_unstable_by_key(|(seq, _, _)| *seq);

        for (_, key, op) in ops {
            let previous = self.index.get(&key).map(|slot| slot.number);
            match op {
                Pending::Upsert(bytes) => {
                    let number = match free.pop_first() {
                        Some(number) => number,
                        None => {
                            next_slot += 1;
                            next_slot - 1
                        }
                    };
                    self.write_slot(number, generation, key, &bytes)?;
                    staged.push((key, number));
                    released.extend(previous);
                }
                Pending::Delete => {
                    if let Some(number) = previous {
                        released.push(number);
                        removed.push(key);
                    }
                }
            }
        }
        self.file.sync_data()?;

        for (_, number) in &staged {
            self.write_state(*number, SLOT_LIVE)?;
        }
        self.file.sync_data()?;

        for number in &released {
            self.write_state(*number, SLOT_FREE)?;
        }
        self.file.sync_data()?;

        for (key, number) in staged {
            self.index.insert(key, SlotRef { number, generation });
        }
        for key in removed {
            self.index.remove(&key);
        }
        free.extend(released);
        self.free = free;
        self.slot_count = next_slot;
        self.generation = generation;
        Ok(())
    }

    /// Close the OS handle and load the file again, dropping anything
    /// that was never committed.
    pub fn reopen(&mut self) -> Result<(), StorageError> {
        let path = self.path.clone();
        self.poisoned = true;
        unlock(&self.file);
        *self = Self::open(&path)?;
        debug!(path = %path.display(), "Reopened record file");
        Ok(())
    }
}
