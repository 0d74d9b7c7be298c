use dupelink::commands::{run_scan, CommandError, ScanOptions};
use dupelink::error::ExitCode;
use dupelink::index::IndexStore;
use dupelink::scanner::{Hasher, WalkerConfig};
use filetime::FileTime;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    File::create(path).unwrap().write_all(content).unwrap();
}

#[test]
fn test_scan_empty_directory() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();

    let summary = run_scan(&ScanOptions::new(root.path(), db_dir.path().join("d.db"))).unwrap();

    assert_eq!(summary.directories, 1);
    assert_eq!(summary.mutations(), 0);
    assert_eq!(summary.exit_code(), ExitCode::Success);
}

#[test]
fn test_second_scan_without_changes_has_no_mutations() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    for i in 0..4 {
        write_file(
            &root.path().join(format!("dir_{i}/file_{i}.txt")),
            format!("content {i}").as_bytes(),
        );
    }
    write_file(&root.path().join("top.txt"), b"top");

    let options = ScanOptions::new(root.path(), db_dir.path().join("d.db")).with_workers(3);
    let first = run_scan(&options).unwrap();
    assert_eq!(first.directories, 5);
    assert_eq!(first.files_added, 5);

    let second = run_scan(&options).unwrap();
    assert_eq!(second.mutations(), 0);
    assert_eq!(second.files_unchanged, 5);
    assert!(second.file_failures.is_empty());
}

#[test]
fn test_single_file_record_untouched_by_second_scan() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = db_dir.path().join("d.db");
    let file = root.path().join("only.txt");
    write_file(&file, b"only");

    run_scan(&ScanOptions::new(root.path(), &db)).unwrap();
    let before = IndexStore::open_existing(&db)
        .unwrap()
        .lookup(&file)
        .unwrap()
        .unwrap();

    run_scan(&ScanOptions::new(root.path(), &db)).unwrap();
    let store = IndexStore::open_existing(&db).unwrap();
    let after = store.lookup(&file).unwrap().unwrap();

    assert_eq!(before, after);
    assert_eq!(store.stats().unwrap().total_records, 1);
    assert!(after.canonical_path.is_none());
    assert_eq!(after.digest, Hasher::new().digest(&file).unwrap());
}

#[test]
fn test_content_and_mtime_change_triggers_rehash() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = db_dir.path().join("d.db");
    let file = root.path().join("changing.txt");
    write_file(&file, b"version one");

    run_scan(&ScanOptions::new(root.path(), &db)).unwrap();

    write_file(&file, b"version two, longer");
    filetime::set_file_mtime(&file, FileTime::from_unix_time(2_000_000_000, 0)).unwrap();

    let summary = run_scan(&ScanOptions::new(root.path(), &db)).unwrap();
    assert_eq!(summary.files_updated, 1);

    let record = IndexStore::open_existing(&db)
        .unwrap()
        .lookup(&file)
        .unwrap()
        .unwrap();
    assert_eq!(record.digest, Hasher::new().digest(&file).unwrap());
    assert_eq!(record.mtime.secs, 2_000_000_000);
}

#[test]
fn test_content_change_with_restored_mtime_is_not_detected() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = db_dir.path().join("d.db");
    let file = root.path().join("sneaky.txt");
    write_file(&file, b"original");
    let original_digest = Hasher::new().digest(&file).unwrap();

    run_scan(&ScanOptions::new(root.path(), &db)).unwrap();
    let mtime = FileTime::from_last_modification_time(&fs::metadata(&file).unwrap());

    write_file(&file, b"modified");
    filetime::set_file_mtime(&file, mtime).unwrap();

    let summary = run_scan(&ScanOptions::new(root.path(), &db)).unwrap();
    assert_eq!(summary.mutations(), 0);

    let record = IndexStore::open_existing(&db)
        .unwrap()
        .lookup(&file)
        .unwrap()
        .unwrap();
    assert_eq!(record.digest, original_digest);
}

#[test]
fn test_new_file_added_on_rescan() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = db_dir.path().join("d.db");
    write_file(&root.path().join("a.txt"), b"a");

    run_scan(&ScanOptions::new(root.path(), &db)).unwrap();
    write_file(&root.path().join("sub/b.txt"), b"b");

    let summary = run_scan(&ScanOptions::new(root.path(), &db)).unwrap();
    assert_eq!(summary.files_added, 1);
    assert_eq!(summary.files_unchanged, 1);
}

#[test]
fn test_removed_files_keep_their_records() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = db_dir.path().join("d.db");
    let gone = root.path().join("gone.txt");
    write_file(&gone, b"bye");

    run_scan(&ScanOptions::new(root.path(), &db)).unwrap();
    fs::remove_file(&gone).unwrap();
    run_scan(&ScanOptions::new(root.path(), &db)).unwrap();

    let store = IndexStore::open_existing(&db).unwrap();
    assert!(store.lookup(&gone).unwrap().is_some());
}

#[test]
fn test_hidden_and_ignored_entries_skipped() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    write_file(&root.path().join("keep.txt"), b"keep");
    write_file(&root.path().join(".hidden.txt"), b"hidden");
    write_file(&root.path().join(".git/config"), b"git");
    write_file(&root.path().join("build/out.o"), b"obj");
    write_file(&root.path().join("notes.part"), b"partial");

    let walker = WalkerConfig::default()
        .with_skip_hidden(true)
        .with_ignore_patterns(vec!["build/".to_string(), "*.part".to_string()]);
    let summary = run_scan(
        &ScanOptions::new(root.path(), db_dir.path().join("d.db")).with_walker(walker),
    )
    .unwrap();

    assert_eq!(summary.directories, 1);
    assert_eq!(summary.files_added, 1);
}

#[test]
fn test_missing_root_is_precondition_error() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("d.db");

    let result = run_scan(&ScanOptions::new(dir.path().join("missing"), &db));

    assert!(matches!(result, Err(CommandError::RootNotFound(_))));
    assert!(!db.exists());
}

#[test]
fn test_root_that_is_a_file_is_precondition_error() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("file.txt");
    write_file(&file, b"x");

    let result = run_scan(&ScanOptions::new(&file, dir.path().join("d.db")));
    assert!(matches!(result, Err(CommandError::RootNotADirectory(_))));
}

#[test]
fn test_many_directories_with_many_workers() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    for d in 0..40 {
        for f in 0..5 {
            write_file(
                &root.path().join(format!("d{d:02}/f{f}.bin")),
                format!("{d}-{f}").as_bytes(),
            );
        }
    }

    let summary = run_scan(
        &ScanOptions::new(root.path(), db_dir.path().join("d.db")).with_workers(8),
    )
    .unwrap();

    assert_eq!(summary.directories, 41);
    assert_eq!(summary.files_added, 200);
    assert!(summary.unit_failures.is_empty());
    assert!(summary.file_failures.is_empty());
}
