//! Crash-safe replacement of a file with a hard link.
//!
//! # Overview
//!
//! [`replace_with_hard_link`] swaps the file at a target path for a hard
//! link to a canonical file in two steps:
//!
//! 1. Create a hard link to the canonical file under a fresh temporary name
//!    in the target's own directory.
//! 2. Atomically rename the temporary name over the target.
//!
//! A reader of the target path sees either the old file or the new link in
//! full, never a missing or truncated file. A crash between the two steps
//! leaves the target untouched plus an orphaned temporary link, which the
//! scanner recognizes by its name (see [`is_temp_link_name`]) and skips.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::MergeError;

/// Prefix of temporary link names.
pub const TEMP_PREFIX: &str = ".dupelink-";

/// Suffix of temporary link names.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Attempts at finding an unused temporary name before giving up.
const MAX_NAME_ATTEMPTS: u32 = 16;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Whether `name` looks like a temporary link left by an interrupted merge.
#[must_use]
pub fn is_temp_link_name(name: &OsStr) -> bool {
    name.to_str()
        .is_some_and(|n| n.starts_with(TEMP_PREFIX) && n.ends_with(TEMP_SUFFIX))
}

fn temp_link_path(dir: &Path) -> PathBuf {
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    dir.join(format!(
        "{TEMP_PREFIX}{}-{counter}-{nanos}{TEMP_SUFFIX}",
        std::process::id()
    ))
}

fn is_cross_device(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::CrossesDevices
}

/// Replace `target` with a hard link to `canonical`.
///
/// # Errors
///
/// - [`MergeError::CrossDevice`] if the two paths are on different filesystems
/// - [`MergeError::Link`] if the temporary link cannot be created
/// - [`MergeError::Rename`] if the final rename fails (the temporary link is
///   removed and the target is left as it was)
pub fn replace_with_hard_link(canonical: &Path, target: &Path) -> Result<(), MergeError> {
    let dir = target.parent().ok_or_else(|| MergeError::Io {
        path: target.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory"),
    })?;

    let mut attempts = 0;
    let temp = loop {
        attempts += 1;
        let candidate = temp_link_path(dir);
        match fs::hard_link(canonical, &candidate) {
            Ok(()) => break candidate,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempts < MAX_NAME_ATTEMPTS => {
                log::trace!("Temporary name taken, retrying: {}", candidate.display());
            }
            Err(e) if is_cross_device(&e) => {
                return Err(MergeError::CrossDevice {
                    canonical: canonical.to_path_buf(),
                    target: target.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(MergeError::Link {
                    canonical: canonical.to_path_buf(),
                    target: target.to_path_buf(),
                    source: e,
                });
            }
        }
    };

    if let Err(e) = fs::rename(&temp, target) {
        if let Err(cleanup) = fs::remove_file(&temp) {
            log::warn!(
                "Failed to remove temporary link {}: {}",
                temp.display(),
                cleanup
            );
        }
        return Err(MergeError::Rename {
            temp,
            target: target.to_path_buf(),
            source: e,
        });
    }

    // rename(2) is a no-op when both names already share an inode.
    if fs::symlink_metadata(&temp).is_ok() {
        if let Err(e) = fs::remove_file(&temp) {
            log::warn!("Failed to remove temporary link {}: {}", temp.display(), e);
        }
    }

    log::trace!("Linked {} -> {}", target.display(), canonical.display());
    Ok(())
}
