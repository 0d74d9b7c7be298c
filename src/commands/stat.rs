//! `stat`: read-only statistics about an existing store.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{absolute_path, CommandError};
use crate::index::{IndexStore, SCHEMA_VERSION};

/// Store statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatSummary {
    /// Absolute store path
    pub store: PathBuf,
    /// Schema version of the store
    pub schema_version: i32,
    /// Indexed files
    pub total_records: u64,
    /// Files already consolidated onto a canonical copy
    pub merged_records: u64,
    /// Groups of unmerged files sharing a digest
    pub duplicate_groups: usize,
    /// Unmerged files in those groups beyond the first of each
    pub redundant_files: u64,
}

/// Report counts from the store at `db`.
///
/// The store is opened read-only, so no record, pragma or schema is ever
/// written; a missing store is not created.
///
/// # Errors
///
/// [`IndexError::NotFound`](crate::index::IndexError::NotFound) if the store
/// does not exist, or an invalid-store error for anything that is not a
/// dupelink index.
pub fn run_stat(db: &Path) -> Result<StatSummary, CommandError> {
    let db = absolute_path(db)?;
    let store = IndexStore::open_read_only(&db)?;
    let stats = store.stats()?;
    let groups = store.group_duplicates()?;
    let redundant_files = groups
        .iter()
        .map(|g| g.member_count.saturating_sub(1) as u64)
        .sum();

    log::debug!(
        "{}: {} record(s), {} merged, {} group(s)",
        db.display(),
        stats.total_records,
        stats.merged_records,
        groups.len()
    );
    Ok(StatSummary {
        store: db,
        schema_version: SCHEMA_VERSION,
        total_records: stats.total_records,
        merged_records: stats.merged_records,
        duplicate_groups: groups.len(),
        redundant_files,
    })
}
