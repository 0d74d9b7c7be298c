//! On-disk file identity for hard-link bookkeeping.
//!
//! # Overview
//!
//! Two paths are hard links of each other when they resolve to the same
//! (device, inode) pair. The scanner records the inode number of every file
//! it indexes, and the merge engine compares identities to decide whether a
//! member is already linked to its canonical file, or whether a link would
//! have to cross a filesystem boundary (which hard links cannot do).
//!
//! # Platform Support
//!
//! - **Unix**: Uses (device_id, inode) pairs from file metadata
//! - **Other**: Identity is unavailable; inode numbers are recorded as `0`
//!   and every member is relinked

use std::fs::Metadata;

/// Platform-specific (device, inode) identity of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeKey {
    /// Device (filesystem) the file lives on
    pub dev: u64,
    /// Inode number within that device
    pub ino: u64,
}

impl InodeKey {
    /// Read the identity from file metadata.
    ///
    /// Returns `None` on platforms without inode information.
    #[cfg(unix)]
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    #[must_use]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }

    /// Whether `other` lives on the same device.
    #[must_use]
    pub fn same_device(&self, other: &Self) -> bool {
        self.dev == other.dev
    }
}

/// Inode number recorded in the index for a file, `0` when unavailable.
#[must_use]
pub fn inode_number(metadata: &Metadata) -> u64 {
    InodeKey::from_metadata(metadata).map_or(0, |key| key.ino)
}
