use dupelink::commands::{run_clean, run_scan, run_stat, CleanOptions, ScanOptions};
use dupelink::error::ExitCode;
use dupelink::index::IndexStore;
use dupelink::scanner::WalkerConfig;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

#[cfg(unix)]
fn inode(path: &Path) -> u64 {
    use std::os::unix::fs::MetadataExt;
    fs::metadata(path).unwrap().ino()
}

fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

struct Fixture {
    root: TempDir,
    _db_dir: TempDir,
    db: PathBuf,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let root = tempdir().unwrap();
        let db_dir = tempdir().unwrap();
        let db = db_dir.path().join("dedup.db");
        for (name, content) in files {
            write_file(&root.path().join(name), content.as_bytes());
        }
        Self {
            root,
            _db_dir: db_dir,
            db,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn scan(&self) {
        let summary = run_scan(&ScanOptions::new(self.root.path(), &self.db)).unwrap();
        assert!(!summary.has_failures());
    }

    fn scan_following_symlinks(&self) {
        let options = ScanOptions::new(self.root.path(), &self.db)
            .with_walker(WalkerConfig::default().with_follow_symlinks(true));
        let summary = run_scan(&options).unwrap();
        assert!(!summary.has_failures());
    }

    fn clean_options(&self) -> CleanOptions {
        CleanOptions::new(self.root.path(), &self.db).with_workers(4)
    }
}

#[cfg(unix)]
#[test]
fn test_two_identical_files_scenario() {
    let fx = Fixture::new(&[("a/x.txt", "identical"), ("b/y.txt", "identical")]);
    fx.scan();

    {
        let store = IndexStore::open_existing(&fx.db).unwrap();
        let x = store.lookup(&fx.path("a/x.txt")).unwrap().unwrap();
        let y = store.lookup(&fx.path("b/y.txt")).unwrap().unwrap();
        assert_eq!(x.digest, y.digest);
        assert!(x.canonical_path.is_none());
        assert!(y.canonical_path.is_none());
    }

    let summary = run_clean(&fx.clean_options()).unwrap();
    assert_eq!(summary.groups, 1);
    assert_eq!(summary.linked, 1);
    assert_eq!(summary.exit_code(), ExitCode::Success);
    assert_eq!(inode(&fx.path("a/x.txt")), inode(&fx.path("b/y.txt")));
    assert_eq!(fs::read(fx.path("b/y.txt")).unwrap(), b"identical");

    let stat = run_stat(&fx.db).unwrap();
    assert_eq!(stat.total_records, 2);
    assert_eq!(stat.merged_records, 1);
}

#[cfg(unix)]
#[test]
fn test_members_point_at_canonical_after_clean() {
    let fx = Fixture::new(&[
        ("one/a.bin", "alpha"),
        ("two/a.bin", "alpha"),
        ("three/a.bin", "alpha"),
        ("one/b.bin", "beta"),
        ("two/b.bin", "beta"),
        ("one/c.bin", "unique"),
    ]);
    fx.scan();

    let summary = run_clean(&fx.clean_options()).unwrap();
    assert_eq!(summary.groups, 2);
    assert_eq!(summary.linked, 3);
    assert_eq!(summary.reclaimed_bytes, 5 + 5 + 4);

    let store = IndexStore::open_existing(&fx.db).unwrap();
    for (canonical, members) in [
        ("one/a.bin", vec!["three/a.bin", "two/a.bin"]),
        ("one/b.bin", vec!["two/b.bin"]),
    ] {
        let canonical_path = fx.path(canonical);
        let canonical_record = store.lookup(&canonical_path).unwrap().unwrap();
        assert!(canonical_record.canonical_path.is_none());

        for member in members {
            let record = store.lookup(&fx.path(member)).unwrap().unwrap();
            assert_eq!(record.inode, canonical_record.inode);
            assert_eq!(record.canonical_path.as_deref(), Some(canonical_path.as_path()));
            assert_eq!(inode(&fx.path(member)), inode(&canonical_path));
        }
    }
}

#[cfg(unix)]
#[test]
fn test_merged_records_are_never_selected_again() {
    let fx = Fixture::new(&[("a.txt", "dup"), ("b.txt", "dup")]);
    fx.scan();
    run_clean(&fx.clean_options()).unwrap();

    let again = run_clean(&fx.clean_options()).unwrap();
    assert!(again.no_duplicates);
    assert_eq!(again.exit_code(), ExitCode::Success);

    // A new copy forms a group with the canonical only.
    write_file(&fx.path("c.txt"), b"dup");
    fx.scan();
    let store = IndexStore::open_existing(&fx.db).unwrap();
    let groups = store.group_duplicates().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].member_count, 2);
    drop(store);

    let summary = run_clean(&fx.clean_options()).unwrap();
    assert_eq!(summary.linked, 1);
    assert_eq!(summary.already_linked, 1);
    assert_eq!(inode(&fx.path("c.txt")), inode(&fx.path("a.txt")));
    assert_eq!(run_stat(&fx.db).unwrap().merged_records, 2);
}

#[cfg(unix)]
#[test]
fn test_modified_member_is_left_alone() {
    let fx = Fixture::new(&[("a.txt", "same"), ("b.txt", "same")]);
    fx.scan();

    let old = FileTime::from_unix_time(1_234_567_890, 0);
    filetime::set_file_mtime(fx.path("b.txt"), old).unwrap();

    let summary = run_clean(&fx.clean_options()).unwrap();
    assert_eq!(summary.linked, 0);
    assert_eq!(summary.member_failures.len(), 1);
    assert!(summary.member_failures[0].path.ends_with("b.txt"));
    assert_eq!(summary.exit_code(), ExitCode::PartialSuccess);
    assert_ne!(inode(&fx.path("a.txt")), inode(&fx.path("b.txt")));

    let unverified = run_clean(&fx.clean_options().with_verify_mtime(false)).unwrap();
    assert_eq!(unverified.linked, 1);
    assert_eq!(inode(&fx.path("a.txt")), inode(&fx.path("b.txt")));
}

#[cfg(unix)]
#[test]
fn test_vanished_canonical_falls_back_to_next_member() {
    let fx = Fixture::new(&[
        ("a.txt", "data"),
        ("b.txt", "data"),
        ("c.txt", "data"),
    ]);
    fx.scan();
    fs::remove_file(fx.path("a.txt")).unwrap();

    let summary = run_clean(&fx.clean_options()).unwrap();
    assert_eq!(summary.linked, 1);
    assert_eq!(summary.member_failures.len(), 1);
    assert_eq!(inode(&fx.path("b.txt")), inode(&fx.path("c.txt")));
}

#[cfg(unix)]
#[test]
fn test_dry_run_changes_nothing() {
    let fx = Fixture::new(&[("a.txt", "dup"), ("b.txt", "dup")]);
    fx.scan();

    let summary = run_clean(&fx.clean_options().with_dry_run(true)).unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.linked, 1);
    assert_eq!(summary.reclaimed_bytes, 3);
    assert_ne!(inode(&fx.path("a.txt")), inode(&fx.path("b.txt")));
    assert_eq!(run_stat(&fx.db).unwrap().merged_records, 0);
}

#[cfg(unix)]
#[test]
fn test_members_outside_root_untouched() {
    let fx = Fixture::new(&[
        ("in/a.txt", "dup"),
        ("in/b.txt", "dup"),
        ("out/c.txt", "dup"),
    ]);
    fx.scan();

    let options = CleanOptions::new(fx.path("in"), &fx.db);
    let summary = run_clean(&options).unwrap();
    assert_eq!(summary.linked, 1);
    assert_eq!(summary.outside_root, 1);
    assert_eq!(inode(&fx.path("in/a.txt")), inode(&fx.path("in/b.txt")));
    assert_ne!(inode(&fx.path("in/a.txt")), inode(&fx.path("out/c.txt")));
}

#[test]
fn test_no_duplicates_reports_and_succeeds() {
    let fx = Fixture::new(&[("a.txt", "one"), ("b.txt", "two")]);
    fx.scan();

    let summary = run_clean(&fx.clean_options()).unwrap();
    assert!(summary.no_duplicates);
    assert_eq!(summary.groups, 0);
    assert_eq!(summary.exit_code(), ExitCode::Success);
}

#[test]
fn test_clean_without_store_fails_before_work() {
    let fx = Fixture::new(&[("a.txt", "one")]);
    assert!(run_clean(&fx.clean_options()).is_err());
    assert!(!fx.db.exists());
}

#[cfg(unix)]
#[test]
fn test_no_temporary_links_left_behind() {
    let fx = Fixture::new(&[
        ("d/a.txt", "dup"),
        ("d/b.txt", "dup"),
        ("d/c.txt", "dup"),
    ]);
    fx.scan();
    run_clean(&fx.clean_options()).unwrap();

    let leftovers: Vec<_> = fs::read_dir(fx.path("d"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(".dupelink-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[cfg(unix)]
fn assert_all_read(fx: &Fixture, names: &[&str], content: &[u8]) {
    for name in names {
        assert_eq!(fs::read(fx.path(name)).unwrap(), content, "{name}");
    }
}

#[cfg(unix)]
#[test]
fn test_relative_symlink_is_left_alone_after_following_scan() {
    let fx = Fixture::new(&[("b/dup.txt", "payload"), ("c/real.txt", "payload")]);
    fs::create_dir_all(fx.path("a/sub")).unwrap();
    std::os::unix::fs::symlink("../../c/real.txt", fx.path("a/sub/link")).unwrap();
    fx.scan_following_symlinks();

    let summary = run_clean(&fx.clean_options()).unwrap();

    assert_eq!(summary.symlinks, 1);
    assert_eq!(summary.linked, 1);
    assert!(summary.member_failures.is_empty());
    assert_eq!(summary.exit_code(), ExitCode::Success);
    assert!(!fs::symlink_metadata(fx.path("b/dup.txt")).unwrap().file_type().is_symlink());
    assert!(fs::symlink_metadata(fx.path("a/sub/link")).unwrap().file_type().is_symlink());
    assert_all_read(&fx, &["a/sub/link", "b/dup.txt", "c/real.txt"], b"payload");
    assert_eq!(inode(&fx.path("b/dup.txt")), inode(&fx.path("c/real.txt")));

    let store = IndexStore::open_existing(&fx.db).unwrap();
    let link = store.lookup(&fx.path("a/sub/link")).unwrap().unwrap();
    assert!(link.canonical_path.is_none());
}

#[cfg(unix)]
#[test]
fn test_absolute_symlink_is_left_alone_after_following_scan() {
    let fx = Fixture::new(&[("b/dup.txt", "payload"), ("c/real.txt", "payload")]);
    fs::create_dir_all(fx.path("a")).unwrap();
    std::os::unix::fs::symlink(fx.path("c/real.txt"), fx.path("a/link")).unwrap();
    fx.scan_following_symlinks();

    let summary = run_clean(&fx.clean_options()).unwrap();

    assert_eq!(summary.symlinks, 1);
    assert_eq!(summary.linked, 1);
    assert!(summary.member_failures.is_empty());
    assert!(fs::symlink_metadata(fx.path("a/link")).unwrap().file_type().is_symlink());
    assert_all_read(&fx, &["a/link", "b/dup.txt", "c/real.txt"], b"payload");
}

#[cfg(unix)]
#[test]
fn test_symlink_pair_without_regular_members_is_skipped() {
    let fx = Fixture::new(&[("real.txt", "payload")]);
    fs::create_dir_all(fx.path("links")).unwrap();
    std::os::unix::fs::symlink("../real.txt", fx.path("links/one")).unwrap();
    std::os::unix::fs::symlink(fx.path("real.txt"), fx.path("links/two")).unwrap();
    fx.scan_following_symlinks();

    let summary = run_clean(&fx.clean_options()).unwrap();

    assert_eq!(summary.linked, 0);
    assert_eq!(summary.already_linked, 0);
    assert_eq!(summary.symlinks, 2);
    assert!(summary.member_failures.is_empty());
    assert_all_read(&fx, &["real.txt", "links/one", "links/two"], b"payload");
}

#[cfg(unix)]
#[test]
fn test_symlinked_directory_members_stay_readable() {
    let fx = Fixture::new(&[("c/real.txt", "payload"), ("d/copy.txt", "payload")]);
    std::os::unix::fs::symlink("c", fx.path("alias")).unwrap();
    fx.scan_following_symlinks();

    let summary = run_clean(&fx.clean_options()).unwrap();

    assert!(summary.member_failures.is_empty());
    assert_all_read(&fx, &["alias/real.txt", "c/real.txt", "d/copy.txt"], b"payload");
    assert!(fs::symlink_metadata(fx.path("alias")).unwrap().file_type().is_symlink());
    assert_eq!(inode(&fx.path("c/real.txt")), inode(&fx.path("d/copy.txt")));
}
