//! Index record definitions.

use std::fs::Metadata;
use std::io;
use std::path::PathBuf;

use serde::Serialize;

use crate::scanner::Digest;

/// File modification time, kept bit-exact as reported by the filesystem.
///
/// The staleness check compares these values for equality, so nothing is
/// rounded or converted through floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Mtime {
    /// Whole seconds since the Unix epoch (may be negative)
    pub secs: i64,
    /// Nanosecond part, `0..1_000_000_000`
    pub nanos: u32,
}

impl Mtime {
    /// Create an mtime from its raw parts.
    #[must_use]
    pub const fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// Read the modification time from file metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot report modification times.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;
        Ok(Self {
            secs: metadata.mtime(),
            nanos: u32::try_from(metadata.mtime_nsec()).unwrap_or(0),
        })
    }

    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        use std::time::UNIX_EPOCH;

        let modified = metadata.modified()?;
        Ok(match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                secs: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
                nanos: d.subsec_nanos(),
            },
            Err(e) => {
                let d = e.duration();
                let secs = -i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
                if d.subsec_nanos() == 0 {
                    Self { secs, nanos: 0 }
                } else {
                    Self {
                        secs: secs - 1,
                        nanos: 1_000_000_000 - d.subsec_nanos(),
                    }
                }
            }
        })
    }
}

/// One tracked path in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Absolute file path; unique in the store
    pub path: PathBuf,
    /// Modification time the digest was computed at
    pub mtime: Mtime,
    /// Content digest as of `mtime`
    pub digest: Digest,
    /// Inode number as of `mtime` (`0` where unavailable)
    pub inode: u64,
    /// Path this record was merged onto, if any
    pub canonical_path: Option<PathBuf>,
}

impl Record {
    /// Create an unmerged record.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, mtime: Mtime, digest: Digest, inode: u64) -> Self {
        Self {
            path: path.into(),
            mtime,
            digest,
            inode,
            canonical_path: None,
        }
    }

    /// Whether this record has been hard-linked onto another path.
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.canonical_path.is_some()
    }

    /// Whether the stored digest is still trusted for a file with `current`
    /// mtime.
    ///
    /// Content edits that leave the mtime untouched are not detected.
    #[must_use]
    pub fn is_fresh(&self, current: Mtime) -> bool {
        self.mtime == current
    }
}

/// A digest shared by at least two unmerged records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashGroup {
    /// The shared content digest
    pub digest: Digest,
    /// Number of unmerged records carrying it
    pub member_count: usize,
}

/// Record counts reported by `stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Total number of records
    pub total_records: u64,
    /// Records with a canonical path set
    pub merged_records: u64,
}
