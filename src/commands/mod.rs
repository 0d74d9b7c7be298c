//! The three operations: `scan`, `stat` and `clean`.
//!
//! Each command validates its preconditions (root directory, store file)
//! before dispatching any work, then aggregates every unit's outcome into a
//! serializable summary. Per-file and per-unit failures end up in the
//! summary; only precondition failures are returned as [`CommandError`].

pub mod clean;
pub mod scan;
pub mod stat;

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::index::IndexError;
use crate::pool::{RunReport, WorkUnit};

pub use clean::{run_clean, CleanOptions, CleanSummary};
pub use scan::{run_scan, ScanOptions, ScanSummary};
pub use stat::{run_stat, StatSummary};

/// Precondition failures that abort a command before any work is done.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The root directory does not exist.
    #[error("Root directory not found: {0}")]
    RootNotFound(PathBuf),

    /// The root path is not a directory.
    #[error("Root is not a directory: {0}")]
    RootNotADirectory(PathBuf),

    /// A path could not be resolved.
    #[error("Cannot resolve {path}: {source}")]
    Io {
        /// Path being resolved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The index store could not be opened or queried.
    #[error(transparent)]
    Store(#[from] IndexError),
}

/// One failed file or unit in a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    /// File path or unit label
    pub path: String,
    /// Error message
    pub message: String,
}

impl FailureEntry {
    /// Create an entry from a path-like label and an error.
    pub fn new(path: impl Into<String>, error: &impl std::fmt::Display) -> Self {
        Self {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

/// Make `path` absolute without touching the filesystem.
///
/// # Errors
///
/// Fails only if the current directory cannot be read.
pub fn absolute_path(path: &Path) -> Result<PathBuf, CommandError> {
    std::path::absolute(path).map_err(|source| CommandError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the root to an absolute path and check that it is a directory.
///
/// # Errors
///
/// [`CommandError::RootNotFound`] or [`CommandError::RootNotADirectory`].
pub fn resolve_root(root: &Path) -> Result<PathBuf, CommandError> {
    let absolute = absolute_path(root)?;
    match std::fs::metadata(&absolute) {
        Ok(m) if m.is_dir() => Ok(absolute),
        Ok(_) => Err(CommandError::RootNotADirectory(absolute)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CommandError::RootNotFound(absolute)),
        Err(source) => Err(CommandError::Io {
            path: absolute,
            source,
        }),
    }
}

/// Failure entries for every unit that did not complete.
fn unit_failures<U: WorkUnit, T>(report: &RunReport<U, T>) -> Vec<FailureEntry> {
    report
        .failures()
        .map(|(unit, error)| FailureEntry::new(unit.label(), error))
        .collect()
}
