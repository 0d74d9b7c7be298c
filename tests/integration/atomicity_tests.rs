use dupelink::merge::{is_temp_link_name, replace_with_hard_link, MergeError};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const SIZE: usize = 256 * 1024;

#[test]
fn test_readers_never_see_partial_content() {
    let dir = tempdir().unwrap();
    let old = vec![b'o'; SIZE];
    let new = vec![b'n'; SIZE];
    let canonical_old = dir.path().join("canonical_old.bin");
    let canonical_new = dir.path().join("canonical_new.bin");
    let target = dir.path().join("target.bin");
    fs::write(&canonical_old, &old).unwrap();
    fs::write(&canonical_new, &new).unwrap();
    fs::write(&target, &old).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let stop = Arc::clone(&stop);
        let target = target.clone();
        let (old, new) = (old.clone(), new.clone());
        thread::spawn(move || {
            let mut reads = 0usize;
            while !stop.load(Ordering::SeqCst) {
                let content = fs::read(&target).expect("target must always exist");
                assert!(
                    content == old || content == new,
                    "observed {} bytes of mixed content",
                    content.len()
                );
                reads += 1;
            }
            reads
        })
    };

    for i in 0..200 {
        let canonical = if i % 2 == 0 {
            &canonical_new
        } else {
            &canonical_old
        };
        replace_with_hard_link(canonical, &target).unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    let reads = reader.join().unwrap();
    assert!(reads > 0);

    let leftovers = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| is_temp_link_name(&e.file_name()))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_failed_link_leaves_target_untouched() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("target.txt");
    fs::write(&target, b"keep me").unwrap();

    let result = replace_with_hard_link(&dir.path().join("missing.txt"), &target);

    assert!(matches!(result, Err(MergeError::Link { .. })));
    assert_eq!(fs::read(&target).unwrap(), b"keep me");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}
