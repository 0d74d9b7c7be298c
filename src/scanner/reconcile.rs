//! Change-aware reconciliation of one directory against the index.
//!
//! # Overview
//!
//! [`reconcile_directory`] walks the immediate (non-recursive) files of one
//! directory. For each regular file it looks up the stored record and:
//!
//! - **Add**: no record exists; hash the file and insert one.
//! - **Update**: the record's mtime differs from the file's; rehash and
//!   update it.
//! - **NoChange**: the mtime matches, or the record was already merged;
//!   the store is not touched.
//!
//! Subdirectories are ignored; each directory is its own unit of work.
//!
//! # Errors
//!
//! Per-file problems (vanished files, permission errors, read failures,
//! files modified mid-hash) skip that file and are collected in the
//! [`DirectoryReport`]. Store failures abort the directory.

use std::fs;
use std::path::{Path, PathBuf};

use super::hardlink::inode_number;
use super::walker::EntryFilter;
use super::{Hasher, ScanError};
use crate::index::{IndexStore, Mtime, Record};
use crate::merge::is_temp_link_name;

/// What reconciliation did with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// A new record was inserted.
    Add,
    /// An existing record was rehashed.
    Update,
    /// The record was left as is.
    NoChange,
}

impl FileEvent {
    /// Short lower-case name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::NoChange => "nochange",
        }
    }
}

/// Outcome of reconciling one directory.
#[derive(Debug, Default)]
pub struct DirectoryReport {
    /// The directory that was reconciled
    pub directory: PathBuf,
    /// Files inserted
    pub added: usize,
    /// Files rehashed
    pub updated: usize,
    /// Files left unchanged
    pub unchanged: usize,
    /// Files skipped because of an error
    pub errors: Vec<ScanError>,
}

impl DirectoryReport {
    fn record(&mut self, event: FileEvent) {
        match event {
            FileEvent::Add => self.added += 1,
            FileEvent::Update => self.updated += 1,
            FileEvent::NoChange => self.unchanged += 1,
        }
    }

    /// Number of files that changed the store.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.added + self.updated
    }
}

/// Reconcile the files directly inside `dir` with the index.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed, or if the store
/// fails in a way that is not specific to one file.
pub fn reconcile_directory(
    dir: &Path,
    store: &IndexStore,
    hasher: &Hasher,
    filter: &EntryFilter,
) -> Result<DirectoryReport, ScanError> {
    let entries = fs::read_dir(dir).map_err(|e| ScanError::from_io(dir, e))?;
    let mut report = DirectoryReport {
        directory: dir.to_path_buf(),
        ..DirectoryReport::default()
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Cannot read entry in {}: {}", dir.display(), e);
                report.errors.push(ScanError::from_io(dir, e));
                continue;
            }
        };

        if is_temp_link_name(&entry.file_name()) {
            log::debug!("Skipping leftover temporary link: {}", entry.path().display());
            continue;
        }

        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            continue;
        }
        if file_type.is_symlink() && !filter.follow_symlinks() {
            log::trace!("Skipping symlink: {}", path.display());
            continue;
        }
        if filter.is_excluded(&path, false) {
            continue;
        }

        match reconcile_file(&path, store, hasher) {
            Ok(Some(event)) => {
                if event == FileEvent::NoChange {
                    log::debug!("{} {}", event.as_str(), path.display());
                } else {
                    log::info!("{} {}", event.as_str(), path.display());
                }
                report.record(event);
            }
            Ok(None) => {}
            Err(e) if e.is_unit_fatal() => return Err(e),
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                report.errors.push(e);
            }
        }
    }

    Ok(report)
}

fn current_state(path: &Path) -> Result<Option<(Mtime, u64)>, ScanError> {
    let metadata = fs::metadata(path).map_err(|e| ScanError::from_io(path, e))?;
    if !metadata.is_file() {
        return Ok(None);
    }
    let mtime = Mtime::from_metadata(&metadata).map_err(|e| ScanError::from_io(path, e))?;
    Ok(Some((mtime, inode_number(&metadata))))
}

/// Reconcile a single file. Returns `None` for entries that are not regular
/// files.
fn reconcile_file(
    path: &Path,
    store: &IndexStore,
    hasher: &Hasher,
) -> Result<Option<FileEvent>, ScanError> {
    let Some((mtime, inode)) = current_state(path)? else {
        return Ok(None);
    };
    if path.to_str().is_none() {
        return Err(ScanError::NonUtf8Path(path.to_path_buf()));
    }

    let existing = store.lookup(path)?;
    if let Some(record) = &existing {
        if record.is_merged() || record.is_fresh(mtime) {
            return Ok(Some(FileEvent::NoChange));
        }
    }

    let digest = hasher.digest(path)?;

    // A write racing the hash could pair a new mtime with old bytes.
    match current_state(path)? {
        Some((after, _)) if after == mtime => {}
        _ => return Err(ScanError::Modified(path.to_path_buf())),
    }

    if existing.is_some() {
        store.update(path, mtime, &digest, inode)?;
        Ok(Some(FileEvent::Update))
    } else {
        store.insert(&Record::new(path, mtime, digest, inode))?;
        Ok(Some(FileEvent::Add))
    }
}
