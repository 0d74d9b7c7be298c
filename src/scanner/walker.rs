//! Iterative directory enumeration.
//!
//! # Overview
//!
//! [`enumerate_directories`] produces the flat list of every directory under
//! a root, the root included. It keeps an explicit stack of pending
//! directories instead of recursing, so arbitrarily deep trees cannot
//! overflow the call stack. Each returned directory becomes one independent
//! unit of scan work.
//!
//! The order of the returned list is not meaningful.
//!
//! # Symlinks
//!
//! Symlinked directories are skipped unless `follow_symlinks` is set. When
//! they are followed, no visited set is kept: a directory reachable through
//! two paths is listed twice, and cycles are cut at `max_depth`.
//!
//! # Example
//!
//! ```no_run
//! use dupelink::scanner::{enumerate_directories, WalkerConfig};
//! use std::path::Path;
//!
//! let listing = enumerate_directories(Path::new("/data"), &WalkerConfig::default()).unwrap();
//! for dir in &listing.directories {
//!     println!("{}", dir.display());
//! }
//! for err in &listing.errors {
//!     eprintln!("Warning: {}", err);
//! }
//! ```

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use super::{ScanError, WalkerConfig};

/// Suffixes SQLite appends to a database path for its side files.
const STORE_SIDE_FILES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Decides which directory entries take part in a scan.
///
/// Shared by the enumerator (for directories) and the reconciler (for
/// files), so both apply identical rules.
#[derive(Debug, Clone)]
pub struct EntryFilter {
    root: PathBuf,
    gitignore: Option<Gitignore>,
    skip_hidden: bool,
    follow_symlinks: bool,
    excluded: Vec<PathBuf>,
}

impl EntryFilter {
    /// Build a filter for entries below `root`.
    ///
    /// Invalid ignore patterns are logged and skipped.
    #[must_use]
    pub fn new(root: &Path, config: &WalkerConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            gitignore: build_gitignore(root, &config.ignore_patterns),
            skip_hidden: config.skip_hidden,
            follow_symlinks: config.follow_symlinks,
            excluded: Vec::new(),
        }
    }

    /// Never index the store file at `path`, nor its SQLite side files.
    #[must_use]
    pub fn with_store_path(mut self, path: &Path) -> Self {
        self.excluded.push(path.to_path_buf());
        for suffix in STORE_SIDE_FILES {
            let mut side = path.as_os_str().to_owned();
            side.push(suffix);
            self.excluded.push(PathBuf::from(side));
        }
        self
    }

    /// Whether symlinked entries are followed.
    #[must_use]
    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// Whether `path` should be left out of the scan.
    #[must_use]
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if self.skip_hidden && path.file_name().is_some_and(is_hidden) {
            log::trace!("Skipping hidden entry: {}", path.display());
            return true;
        }

        if !is_dir && self.excluded.iter().any(|p| p == path) {
            return true;
        }

        if let Some(gi) = &self.gitignore {
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let relative = if cfg!(windows) {
                PathBuf::from(relative.to_string_lossy().replace('\\', "/"))
            } else {
                relative.to_path_buf()
            };
            if gi.matched(&relative, is_dir).is_ignore() {
                log::trace!("Ignoring: {}", path.display());
                return true;
            }
        }

        false
    }
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

fn build_gitignore(root: &Path, patterns: &[String]) -> Option<Gitignore> {
    if patterns.is_empty() {
        return None;
    }

    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        if let Err(e) = builder.add_line(None, pattern) {
            log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
        }
    }

    match builder.build() {
        Ok(gitignore) if gitignore.is_empty() => None,
        Ok(gitignore) => Some(gitignore),
        Err(e) => {
            log::warn!("Failed to build ignore patterns: {}", e);
            None
        }
    }
}

/// Result of enumerating a tree.
#[derive(Debug, Default)]
pub struct DirectoryList {
    /// Every listable directory found, the root included
    pub directories: Vec<PathBuf>,
    /// Directories that could not be listed; their subtrees are missing
    pub errors: Vec<ScanError>,
}

/// List every directory under `root`, including `root` itself.
///
/// Listing failures below the root are collected in
/// [`DirectoryList::errors`] rather than aborting the walk.
///
/// # Errors
///
/// Fails only if `root` itself is missing, unreadable, or not a directory.
pub fn enumerate_directories(root: &Path, config: &WalkerConfig) -> Result<DirectoryList, ScanError> {
    let metadata = fs::metadata(root).map_err(|e| ScanError::from_io(root, e))?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    // Surface an unreadable root as a precondition failure.
    fs::read_dir(root).map_err(|e| ScanError::from_io(root, e))?;

    let filter = EntryFilter::new(root, config);
    let mut listing = DirectoryList::default();
    let mut pending: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];

    while let Some((dir, depth)) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot list directory {}: {}", dir.display(), e);
                listing.errors.push(ScanError::from_io(&dir, e));
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Cannot read entry in {}: {}", dir.display(), e);
                    listing.errors.push(ScanError::from_io(&dir, e));
                    continue;
                }
            };
            let path = entry.path();

            if !is_subdirectory(&entry, &path, config.follow_symlinks) {
                continue;
            }
            if filter.is_excluded(&path, true) {
                continue;
            }
            if config.follow_symlinks && depth + 1 > config.max_depth {
                log::debug!(
                    "Not descending past max depth {}: {}",
                    config.max_depth,
                    path.display()
                );
                continue;
            }

            pending.push((path, depth + 1));
        }

        listing.directories.push(dir);
    }

    log::debug!(
        "Enumerated {} directories under {} ({} errors)",
        listing.directories.len(),
        root.display(),
        listing.errors.len()
    );
    Ok(listing)
}

fn is_subdirectory(entry: &fs::DirEntry, path: &Path, follow_symlinks: bool) -> bool {
    let Ok(file_type) = entry.file_type() else {
        return false;
    };
    if file_type.is_dir() {
        return true;
    }
    if file_type.is_symlink() {
        if !follow_symlinks {
            log::trace!("Skipping symlink: {}", path.display());
            return false;
        }
        return fs::metadata(path).is_ok_and(|m| m.is_dir());
    }
    false
}
