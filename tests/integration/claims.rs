//! Claim cache over a real library

use chrono::Utc;
use imgvault::cache::LoadedBinaryCache;
use imgvault::library::Library;
use tempfile::TempDir;
use uuid::Uuid;

#[test]
fn claims_read_through_to_library_data() {
    let temp_dir = TempDir::new().unwrap();
    let library = Library::create(temp_dir.path()).unwrap();
    let ops = library.operations();
    let ids: Vec<Uuid> = (0..8)
        .map(|i| {
            let data = vec![i as u8; 25_000];
            ops.add_file(&data, &format!("img{}", i), &["x"], Utc::now(), "/")
                .unwrap()
                .id
        })
        .collect();

    let cache = LoadedBinaryCache::new(3, library.binaries().clone());
    {
        let claims: Vec<_> = ids
            .iter()
            .map(|id| cache.get_binary(*id).unwrap().unwrap())
            .collect();
        assert_eq!(cache.num_items(), 8);
        for (i, claim) in claims.iter().enumerate() {
            assert_eq!(claim.len(), 25_000);
            assert!(claim.iter().all(|b| *b == i as u8));
        }
    }
    assert_eq!(cache.num_items(), 3);
    assert!(cache.get_binary(Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn deleted_file_stays_readable_while_claimed() {
    let temp_dir = TempDir::new().unwrap();
    let library = Library::create(temp_dir.path()).unwrap();
    let ops = library.operations();
    let id = ops.add_file(b"pinned", "p", &["x"], Utc::now(), "/").unwrap().id;

    let cache = LoadedBinaryCache::new(1, library.binaries().clone());
    let claim = cache.get_binary(id).unwrap().unwrap();
    ops.delete_file(id).unwrap();

    assert_eq!(&*claim, b"pinned");
    // Still resident, so no reload is attempted.
    assert!(cache.get_binary(id).unwrap().is_some());
}
