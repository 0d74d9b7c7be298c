//! Scanner module: directory enumeration, content hashing and per-directory
//! reconciliation against the index.
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Iterative enumeration of every directory under a root
//! - [`hasher`]: BLAKE3 file hashing (streaming)
//! - [`hardlink`]: (device, inode) identity helpers
//! - [`reconcile`]: Change-aware reconciliation of one directory's files
//!
//! Each directory returned by the walker is an independent unit of work: the
//! reconciler only looks at the directory's immediate files, so units never
//! touch the same path.
//!
//! # Example
//!
//! ```no_run
//! use dupelink::index::IndexStore;
//! use dupelink::scanner::{enumerate_directories, reconcile_directory, EntryFilter, Hasher, WalkerConfig};
//! use std::path::Path;
//!
//! let root = Path::new("/data");
//! let config = WalkerConfig::default();
//! let store = IndexStore::open(Path::new("dedup.db")).unwrap();
//! let filter = EntryFilter::new(root, &config);
//! let hasher = Hasher::new();
//!
//! for dir in enumerate_directories(root, &config).unwrap().directories {
//!     let report = reconcile_directory(&dir, &store, &hasher, &filter).unwrap();
//!     println!("{}: {} added", dir.display(), report.added);
//! }
//! ```

pub mod hardlink;
pub mod hasher;
pub mod reconcile;
pub mod walker;

use std::io;
use std::path::{Path, PathBuf};

use crate::index::IndexError;

// Re-export main types
pub use hardlink::InodeKey;
pub use hasher::{digest_to_hex, hex_to_digest, Digest, DigestParseError, Hasher, DEFAULT_CHUNK_SIZE};
pub use reconcile::{reconcile_directory, DirectoryReport, FileEvent};
pub use walker::{enumerate_directories, DirectoryList, EntryFilter};

/// Default bound on enumeration depth.
///
/// Only reachable through symlink cycles when `follow_symlinks` is enabled,
/// since no visited set is kept.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Configuration for directory enumeration and file filtering.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Descend into symlinked directories and index symlinked files.
    ///
    /// No visited set is kept: a directory reachable through two symlinked
    /// paths is enumerated twice, and cycles stop at `max_depth`.
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Maximum directory depth below the root (root is depth 0) while
    /// following symlinks. Plain directory trees are never cut off.
    pub max_depth: usize,

    /// Glob patterns to ignore (gitignore-style), applied to both
    /// directories and files.
    pub ignore_patterns: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            skip_hidden: false,
            max_depth: DEFAULT_MAX_DEPTH,
            ignore_patterns: Vec::new(),
        }
    }
}

impl WalkerConfig {
    /// Enable or disable following symbolic links.
    #[must_use]
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Enable or disable skipping hidden entries.
    #[must_use]
    pub fn with_skip_hidden(mut self, skip: bool) -> Self {
        self.skip_hidden = skip;
        self
    }

    /// Set the maximum enumeration depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set gitignore-style ignore patterns.
    #[must_use]
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }
}

/// Errors that can occur during enumeration and reconciliation.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The specified path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The path cannot be stored because it is not valid UTF-8.
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    /// The file's mtime changed while it was being hashed.
    #[error("File modified while hashing: {0}")]
    Modified(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Hashing the file failed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// The index store rejected an operation.
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl ScanError {
    /// Classify an I/O error for `path`.
    #[must_use]
    pub fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }

    /// Whether this error must abort the whole directory unit rather than
    /// just the file it occurred on.
    ///
    /// Store failures (including exhausted busy retries) are unit-level. A
    /// uniqueness conflict only means another unit indexed the same path
    /// first, so it stays per-file.
    #[must_use]
    pub fn is_unit_fatal(&self) -> bool {
        matches!(self, Self::Index(e) if !matches!(e, IndexError::Conflict(_)))
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl HashError {
    /// Classify an I/O error for `path`.
    #[must_use]
    pub fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }
}
