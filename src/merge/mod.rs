//! Duplicate consolidation.
//!
//! # Overview
//!
//! [`merge_group`] consolidates one duplicate group: it picks a canonical
//! member, replaces every other member's file with a hard link to it (see
//! [`linker`]), and records the new relationship in the index.
//!
//! # Canonical selection
//!
//! Members are considered in store order: unmerged records first, then by
//! path. The first member that still exists on disk (and, with
//! `verify_mtime`, still carries its recorded mtime) becomes canonical, so
//! repeated runs over the same data pick the same canonical file.
//! Members whose own path is a symbolic link (indexed when symlinks are
//! followed) are counted and left alone: they are neither canonical nor
//! replaced.
//!
//! # Failure handling
//!
//! A member that fails verification or cannot be linked is reported and
//! left untouched; the rest of the group continues. The index is updated
//! only after the filesystem step succeeds. A store failure aborts the
//! group.

pub mod linker;

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use crate::index::{HashGroup, IndexError, IndexStore, Mtime, Record};
use crate::scanner::{digest_to_hex, Digest, InodeKey};

pub use linker::{is_temp_link_name, replace_with_hard_link, TEMP_PREFIX};

/// Errors that can occur while merging a duplicate group.
#[derive(thiserror::Error, Debug)]
pub enum MergeError {
    /// The file no longer matches its record.
    #[error("stale record for {path}: {reason}")]
    Stale {
        /// Member path
        path: PathBuf,
        /// What changed
        reason: String,
    },

    /// The member lives on a different filesystem than the canonical file.
    #[error("cannot link across filesystems: {target} -> {canonical}")]
    CrossDevice {
        /// Canonical file
        canonical: PathBuf,
        /// Member that would have been replaced
        target: PathBuf,
    },

    /// Creating the temporary hard link failed.
    #[error("failed to link {target} -> {canonical}: {source}")]
    Link {
        /// Canonical file
        canonical: PathBuf,
        /// Member that would have been replaced
        target: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Renaming the temporary link over the member failed.
    #[error("failed to rename {temp} over {target}: {source}")]
    Rename {
        /// Temporary link (already removed)
        temp: PathBuf,
        /// Member that would have been replaced
        target: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The index store failed.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Configuration for consolidation.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Only members under this directory are touched
    pub root: PathBuf,
    /// Report what would be linked without changing anything
    pub dry_run: bool,
    /// Treat members whose mtime no longer matches the record as stale
    pub verify_mtime: bool,
}

impl MergeConfig {
    /// Create a config that merges members under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dry_run: false,
            verify_mtime: true,
        }
    }

    /// Enable/disable dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable/disable mtime verification before linking.
    #[must_use]
    pub fn with_verify_mtime(mut self, verify: bool) -> Self {
        self.verify_mtime = verify;
        self
    }
}

/// Outcome of consolidating one group.
#[derive(Debug, Default)]
pub struct GroupReport {
    /// The shared digest
    pub digest: Digest,
    /// Chosen canonical path, if any member qualified
    pub canonical: Option<PathBuf>,
    /// Members replaced by a hard link (or that would be, in dry-run)
    pub linked: Vec<PathBuf>,
    /// Members that already shared the canonical inode
    pub already_linked: Vec<PathBuf>,
    /// Members left untouched because of an error
    pub failures: Vec<(PathBuf, MergeError)>,
    /// Members skipped because they lie outside the root
    pub outside_root: usize,
    /// Members skipped because their path is a symbolic link
    pub symlinks: usize,
    /// Bytes of replaced member files
    pub reclaimed_bytes: u64,
}

impl GroupReport {
    fn new(digest: Digest) -> Self {
        Self {
            digest,
            ..Self::default()
        }
    }
}

impl crate::pool::WorkUnit for HashGroup {
    fn label(&self) -> String {
        let hex = digest_to_hex(&self.digest);
        format!("{} ({} files)", &hex[..16], self.member_count)
    }
}

/// On-disk state of a member, checked against its record.
struct Verified {
    metadata: Metadata,
    key: Option<InodeKey>,
}

fn verify_member(record: &Record, verify_mtime: bool) -> Result<Verified, MergeError> {
    let stale = |reason: String| MergeError::Stale {
        path: record.path.clone(),
        reason,
    };

    // hard_link(2) on a symlink links the link itself, not its target.
    let metadata = fs::symlink_metadata(&record.path).map_err(|e| stale(e.to_string()))?;
    if metadata.file_type().is_symlink() {
        return Err(stale("is a symbolic link".to_string()));
    }
    if !metadata.is_file() {
        return Err(stale("no longer a regular file".to_string()));
    }

    if verify_mtime {
        let current = Mtime::from_metadata(&metadata).map_err(|e| stale(e.to_string()))?;
        if current != record.mtime {
            log::warn!(
                "File modified since scan: {} (mtime changed)",
                record.path.display()
            );
            return Err(stale("modified since scan".to_string()));
        }
    }

    let key = InodeKey::from_metadata(&metadata);
    Ok(Verified { metadata, key })
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

/// Consolidate one duplicate group.
///
/// # Errors
///
/// Returns [`MergeError::Index`] if the store fails; per-member problems are
/// collected in [`GroupReport::failures`] instead.
pub fn merge_group(
    store: &IndexStore,
    group: &HashGroup,
    config: &MergeConfig,
) -> Result<GroupReport, MergeError> {
    let mut report = GroupReport::new(group.digest);

    let (members, outside): (Vec<Record>, Vec<Record>) = store
        .members(&group.digest)?
        .into_iter()
        .partition(|r| r.path.starts_with(&config.root));
    report.outside_root = outside.len();
    for record in &outside {
        log::debug!("Leaving member outside root: {}", record.path.display());
    }

    let (symlinks, members): (Vec<Record>, Vec<Record>) =
        members.into_iter().partition(|r| is_symlink(&r.path));
    report.symlinks = symlinks.len();
    for record in &symlinks {
        log::debug!("Leaving symbolic link untouched: {}", record.path.display());
    }

    if members.len() < 2 {
        log::debug!(
            "Group {} has {} member(s) under root, skipping",
            digest_to_hex(&group.digest),
            members.len()
        );
        return Ok(report);
    }

    let mut remaining = members.into_iter();
    let mut canonical = None;
    for record in remaining.by_ref() {
        match verify_member(&record, config.verify_mtime) {
            Ok(verified) => {
                canonical = Some((record, verified));
                break;
            }
            Err(e) => {
                log::warn!("Skipping member {}: {}", record.path.display(), e);
                report.failures.push((record.path.clone(), e));
            }
        }
    }
    let Some((canonical, canonical_state)) = canonical else {
        return Ok(report);
    };
    report.canonical = Some(canonical.path.clone());
    log::debug!(
        "Canonical for {}: {}",
        digest_to_hex(&group.digest),
        canonical.path.display()
    );

    for member in remaining {
        match merge_member(store, &canonical, &canonical_state, &member, config) {
            Ok(MemberResult::Linked(bytes)) => {
                report.reclaimed_bytes += bytes;
                report.linked.push(member.path);
            }
            Ok(MemberResult::AlreadyLinked) => report.already_linked.push(member.path),
            Err(MergeError::Index(e)) => return Err(MergeError::Index(e)),
            Err(e) => {
                log::warn!("Failed to merge {}: {}", member.path.display(), e);
                report.failures.push((member.path, e));
            }
        }
    }

    log::info!(
        "Merged group {}: {} linked, {} already linked, {} failed",
        &digest_to_hex(&group.digest)[..16],
        report.linked.len(),
        report.already_linked.len(),
        report.failures.len()
    );
    Ok(report)
}

enum MemberResult {
    Linked(u64),
    AlreadyLinked,
}

fn merge_member(
    store: &IndexStore,
    canonical: &Record,
    canonical_state: &Verified,
    member: &Record,
    config: &MergeConfig,
) -> Result<MemberResult, MergeError> {
    let state = verify_member(member, config.verify_mtime)?;

    if let (Some(member_key), Some(canonical_key)) = (state.key, canonical_state.key) {
        if member_key == canonical_key {
            let bookkeeping_current = member.canonical_path.as_deref()
                == Some(canonical.path.as_path())
                && member.inode == canonical.inode;
            if !bookkeeping_current && !config.dry_run {
                record_merge(store, canonical, &member.path)?;
            }
            return Ok(MemberResult::AlreadyLinked);
        }
        if !member_key.same_device(&canonical_key) {
            return Err(MergeError::CrossDevice {
                canonical: canonical.path.clone(),
                target: member.path.clone(),
            });
        }
    }

    let size = state.metadata.len();
    if config.dry_run {
        log::info!(
            "Would link {} -> {}",
            member.path.display(),
            canonical.path.display()
        );
        return Ok(MemberResult::Linked(size));
    }

    replace_with_hard_link(&canonical.path, &member.path)?;
    record_merge(store, canonical, &member.path)?;
    Ok(MemberResult::Linked(size))
}

fn record_merge(store: &IndexStore, canonical: &Record, member: &Path) -> Result<(), MergeError> {
    store.update_merge(member, canonical.mtime, canonical.inode, &canonical.path)?;
    Ok(())
}
