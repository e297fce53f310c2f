//! Library create/open round trips through real store files

use chrono::{TimeZone, Utc};
use imgvault::library::{Library, BINARIES_FILE, DATA_FILE, PATHS_FILE, TAGS_FILE};
use imgvault::store::MAX_BLOCK_SIZE;
use imgvault::LibraryError;
use tempfile::TempDir;

#[test]
fn renamed_file_keeps_new_name_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("library");

    let id = {
        let library = Library::create(&root).unwrap();
        let ops = library.operations();
        let record = ops
            .add_file(&[1, 2, 3], "a", &["x"], Utc::now(), "/imports")
            .unwrap();
        ops.rename(record.id, "b").unwrap();
        record.id
    };

    let library = Library::open(&root).unwrap();
    let binaries = library.binaries().binaries();
    assert_eq!(binaries.len(), 1);
    assert_eq!(binaries[0].id, id);
    assert_eq!(library.tags().get(binaries[0].name_tag), "b");
    assert_eq!(library.tags().get(binaries[0].original_file_name_tag), "a");
    assert_eq!(library.operations().binary_data(id).unwrap(), vec![1, 2, 3]);
}

#[test]
fn library_state_survives_many_reopens() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let date = Utc.with_ymd_and_hms(2013, 7, 1, 8, 0, 0).unwrap();
    let big: Vec<u8> = (0..MAX_BLOCK_SIZE * 3 + 7).map(|i| (i % 241) as u8).collect();

    let (small_id, big_id) = {
        let library = Library::create(root).unwrap();
        let ops = library.operations();
        let small = ops.add_file(b"tiny", "small", &["trip", "day1"], date, "/cam").unwrap();
        let big = ops.add_file(&big, "large", &["trip", "day2"], date, "/cam").unwrap();
        (small.id, big.id)
    };

    {
        let library = Library::open(root).unwrap();
        let ops = library.operations();
        ops.move_file(small_id, &["archive"], "small").unwrap();
        assert_eq!(ops.add_file(b"x", "third", &["trip"], date, "/cam").unwrap().file_index, 3);
    }

    let library = Library::open(root).unwrap();
    let ops = library.operations();
    let small = ops.entry(small_id).unwrap();
    assert_eq!(small.folder, vec!["archive"]);
    assert_eq!(small.original_container, "/cam");
    assert_eq!(small.original_date, date);
    assert_eq!(ops.binary_data(big_id).unwrap(), big);

    let names: Vec<_> = ops.entries().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["small", "large", "third"]);
}

#[test]
fn folder_operations_persist() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let date = Utc::now();

    {
        let library = Library::create(root).unwrap();
        let ops = library.operations();
        ops.add_file(b"1", "a", &["holiday", "beach"], date, "/").unwrap();
        ops.add_file(b"2", "b", &["holiday", "beach", "sunset"], date, "/").unwrap();
        ops.add_file(b"3", "c", &["holiday", "city"], date, "/").unwrap();
        ops.add_file(b"4", "d", &["work"], date, "/").unwrap();

        assert_eq!(ops.move_folder(&["holiday", "beach"], &["best"]).unwrap(), 2);
        assert_eq!(ops.rename_folder(&["holiday"], "travel").unwrap(), 1);
        assert_eq!(ops.delete_folder(&["work"]).unwrap(), 1);
    }

    let library = Library::open(root).unwrap();
    let ops = library.operations();
    let mut folders: Vec<_> = ops
        .entries()
        .into_iter()
        .map(|e| format!("{}:{}", e.folder.join("/"), e.name))
        .collect();
    folders.sort();
    assert_eq!(
        folders,
        vec!["best/beach/sunset:b", "best/beach:a", "travel/city:c"]
    );
}

#[test]
fn create_over_existing_library_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    drop(Library::create(temp_dir.path()).unwrap());

    let result = Library::create(temp_dir.path());
    assert!(matches!(result, Err(LibraryError::RootNotEmpty(_))));
    for name in [BINARIES_FILE, DATA_FILE, TAGS_FILE, PATHS_FILE] {
        assert!(temp_dir.path().join(name).is_file());
    }
}

#[test]
fn open_of_directory_without_stores_fails() {
    let temp_dir = TempDir::new().unwrap();
    let result = Library::open(temp_dir.path());
    assert!(matches!(result, Err(LibraryError::Storage(_))));
}
