use dupelink::commands::{run_scan, run_stat, CommandError, ScanOptions};
use dupelink::index::{IndexError, IndexStore, SCHEMA_VERSION};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_stat_on_nonexistent_store_is_handled() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("never-created.db");

    match run_stat(&db) {
        Err(CommandError::Store(IndexError::NotFound(path))) => assert_eq!(path, db),
        other => panic!("Expected NotFound, got: {:?}", other),
    }
    assert!(!db.exists());
}

#[test]
fn test_stat_on_directory_is_handled() {
    let dir = tempdir().unwrap();
    assert!(run_stat(dir.path()).is_err());
}

#[test]
fn test_stat_on_foreign_sqlite_database() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("other.db");
    {
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch("CREATE TABLE notes (body TEXT);").unwrap();
    }

    let err = run_stat(&db).unwrap_err();
    assert!(matches!(
        err,
        CommandError::Store(IndexError::InvalidStore { .. })
    ));
}

#[test]
fn test_stat_after_scan() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = db_dir.path().join("d.db");
    fs::write(root.path().join("a.txt"), b"same").unwrap();
    fs::write(root.path().join("b.txt"), b"same").unwrap();
    fs::write(root.path().join("c.txt"), b"other").unwrap();

    run_scan(&ScanOptions::new(root.path(), &db)).unwrap();
    let summary = run_stat(&db).unwrap();

    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.merged_records, 0);
    assert_eq!(summary.duplicate_groups, 1);
    assert_eq!(summary.redundant_files, 1);
    assert_eq!(summary.schema_version, SCHEMA_VERSION);
}

#[test]
fn test_stat_does_not_modify_store() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("d.db");
    drop(IndexStore::open(&db).unwrap());

    let before = run_stat(&db).unwrap();
    let after = run_stat(&db).unwrap();
    assert_eq!(before, after);
    assert_eq!(after.total_records, 0);
}

#[test]
fn test_stat_writes_nothing_to_store() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("d.db");
    drop(IndexStore::open(&db).unwrap());
    // Switch to a rollback journal so any pragma write would be visible.
    let conn = rusqlite::Connection::open(&db).unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode = DELETE", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "delete");
    drop(conn);
    let bytes_before = fs::read(&db).unwrap();

    run_stat(&db).unwrap();

    assert_eq!(fs::read(&db).unwrap(), bytes_before);
    assert!(!dir.path().join("d.db-wal").exists());
    let conn = rusqlite::Connection::open(&db).unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "delete");
}
