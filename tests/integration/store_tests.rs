use dupelink::index::{IndexStore, Mtime, Record, RetryPolicy};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_concurrent_connections_all_writes_land() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("d.db");
    drop(IndexStore::open(&db).unwrap());

    let retry = RetryPolicy {
        max_attempts: 50,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(50),
    };
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let db = db.clone();
            thread::spawn(move || {
                let store = IndexStore::open_existing(&db)
                    .unwrap()
                    .with_retry_policy(retry);
                for i in 0..50u8 {
                    let path = PathBuf::from(format!("/w{worker}/f{i}"));
                    let record = Record::new(path, Mtime::new(1, 0), [i; 32], u64::from(i));
                    store.insert(&record).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let store = IndexStore::open_existing(&db).unwrap();
    assert_eq!(store.stats().unwrap().total_records, 400);
    // Same digest per `i` across 8 workers.
    let groups = store.group_duplicates().unwrap();
    assert_eq!(groups.len(), 50);
    assert!(groups.iter().all(|g| g.member_count == 8));
}

#[test]
fn test_reopen_preserves_records() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("d.db");
    {
        let store = IndexStore::open(&db).unwrap();
        store
            .insert(&Record::new("/x", Mtime::new(5, 123), [9; 32], 77))
            .unwrap();
    }

    let store = IndexStore::open(&db).unwrap();
    let record = store.lookup(&PathBuf::from("/x")).unwrap().unwrap();
    assert_eq!(record.mtime, Mtime::new(5, 123));
    assert_eq!(record.inode, 77);
    assert_eq!(record.digest, [9; 32]);
}

#[test]
fn test_large_inode_round_trips() {
    let dir = tempdir().unwrap();
    let store = IndexStore::open(&dir.path().join("d.db")).unwrap();
    store
        .insert(&Record::new("/big", Mtime::new(-1, 999_999_999), [1; 32], u64::MAX))
        .unwrap();

    let record = store.lookup(&PathBuf::from("/big")).unwrap().unwrap();
    assert_eq!(record.inode, u64::MAX);
    assert_eq!(record.mtime, Mtime::new(-1, 999_999_999));
}
