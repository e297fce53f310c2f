//! Crash consistency across the metadata and data files

use chrono::Utc;
use imgvault::library::{Library, BINARIES_FILE, DATA_FILE, TAGS_FILE};
use imgvault::record::FixedFile;
use imgvault::store::{BinaryRecord, DataBlock, MAX_BLOCK_SIZE};
use imgvault::types::NIL_BLOCK;
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;
use uuid::Uuid;

/// Commit a metadata record whose data never reached disk, as an add that
/// crashed between its two commits would leave behind.
fn write_dangling_record(root: &std::path::Path, file_index: u64) -> Uuid {
    let mut file = FixedFile::<BinaryRecord>::open(&root.join(BINARIES_FILE)).unwrap();
    let record = BinaryRecord {
        id: Uuid::new_v4(),
        first_data_block_id: Uuid::new_v4(),
        file_index,
        ..Default::default()
    };
    file.write(&record).unwrap();
    file.commit().unwrap();
    record.id
}

#[test]
fn interrupted_add_is_repaired_on_open() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let kept: Vec<Uuid> = {
        let library = Library::create(root).unwrap();
        let ops = library.operations();
        (0..3)
            .map(|i| {
                ops.add_file(&[i as u8; 64], &format!("f{}", i), &["x"], Utc::now(), "/")
                    .unwrap()
                    .id
            })
            .collect()
    };

    let dangling = write_dangling_record(root, 4);

    let library = Library::open(root).unwrap();
    assert!(library.binaries().get(dangling).is_none());
    assert_eq!(library.binaries().len(), 3);
    for id in &kept {
        assert!(library.binaries().get(*id).is_some());
    }

    // The next add continues after the surviving records.
    let record = library
        .operations()
        .add_file(b"next", "next", &["x"], Utc::now(), "/")
        .unwrap();
    assert_eq!(record.file_index, 4);
}

#[test]
fn add_with_only_chain_head_on_disk_is_repaired() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let (kept, partial) = {
        let library = Library::create(root).unwrap();
        let ops = library.operations();
        let kept = ops.add_file(b"whole", "kept", &["x"], Utc::now(), "/").unwrap();
        let data = vec![7u8; MAX_BLOCK_SIZE * 2 + 1];
        let partial = ops.add_file(&data, "partial", &["x"], Utc::now(), "/").unwrap();
        (kept.id, partial)
    };

    // The head went live but the older links of its chain did not.
    {
        let mut blocks = FixedFile::<DataBlock>::open(&root.join(DATA_FILE)).unwrap();
        let mut next = blocks
            .get(partial.first_data_block_id)
            .unwrap()
            .unwrap()
            .next_block;
        while next != NIL_BLOCK {
            let block = blocks.get(next).unwrap().unwrap();
            blocks.delete(next).unwrap();
            next = block.next_block;
        }
        blocks.commit().unwrap();
        assert!(blocks.contains(partial.first_data_block_id));
    }

    let library = Library::open(root).unwrap();
    let ops = library.operations();
    assert!(library.binaries().get(partial.id).is_none());
    assert_eq!(library.binaries().len(), 1);
    assert_eq!(ops.binary_data(kept).unwrap(), b"whole".to_vec());
}

#[test]
fn repair_is_durable() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    drop(Library::create(root).unwrap());
    let dangling = write_dangling_record(root, 1);

    drop(Library::open(root).unwrap());
    let file = FixedFile::<BinaryRecord>::open(&root.join(BINARIES_FILE)).unwrap();
    assert!(!file.contains(dangling));
    assert!(file.is_empty());
}

#[test]
fn torn_tag_log_tail_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let id = {
        let library = Library::create(root).unwrap();
        library
            .operations()
            .add_file(b"abc", "kept", &["folder"], Utc::now(), "/")
            .unwrap()
            .id
    };

    // Half of an entry header, as a crash mid-append would leave.
    let mut tags = OpenOptions::new()
        .append(true)
        .open(root.join(TAGS_FILE))
        .unwrap();
    tags.write_all(&[9, 0, 0]).unwrap();
    drop(tags);

    let library = Library::open(root).unwrap();
    let ops = library.operations();
    assert_eq!(ops.entry(id).unwrap().name, "kept");
    let new_tag = library.tags().add_or_get("after-repair").unwrap();
    drop(library);

    let library = Library::open(root).unwrap();
    assert_eq!(library.tags().get(new_tag), "after-repair");
}
