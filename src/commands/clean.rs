//! `clean`: consolidate every qualifying duplicate group into hard links.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{absolute_path, resolve_root, unit_failures, CommandError, FailureEntry};
use crate::error::ExitCode;
use crate::index::{IndexStore, RetryPolicy};
use crate::merge::{merge_group, MergeConfig};
use crate::pool::{default_workers, Dispatcher, UnitError};
use crate::progress::ProgressCallback;

/// Inputs for a clean.
#[derive(Clone)]
pub struct CleanOptions {
    /// Only members under this directory are touched
    pub root: PathBuf,
    /// Existing index store
    pub db: PathBuf,
    /// Worker count
    pub workers: usize,
    /// Report what would be linked without changing anything
    pub dry_run: bool,
    /// Check each member's mtime against its record before linking
    pub verify_mtime: bool,
    /// Busy-retry schedule for worker connections
    pub retry: RetryPolicy,
    /// Stops dispatch of new groups when set
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Progress reporting
    pub progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for CleanOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanOptions")
            .field("root", &self.root)
            .field("db", &self.db)
            .field("workers", &self.workers)
            .field("dry_run", &self.dry_run)
            .field("verify_mtime", &self.verify_mtime)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CleanOptions {
    /// Clean `root` using the store at `db` with default settings.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, db: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            db: db.into(),
            workers: default_workers(),
            dry_run: false,
            verify_mtime: true,
            retry: RetryPolicy::default(),
            shutdown_flag: None,
            progress: None,
        }
    }

    /// Set the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Enable or disable dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable or disable pre-link mtime verification.
    #[must_use]
    pub fn with_verify_mtime(mut self, verify: bool) -> Self {
        self.verify_mtime = verify;
        self
    }

    /// Set the busy-retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the shutdown flag.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// What a clean did.
#[derive(Debug, Clone, Serialize)]
pub struct CleanSummary {
    /// Absolute root
    pub root: PathBuf,
    /// Absolute store path
    pub store: PathBuf,
    /// When the clean started
    pub started_at: DateTime<Utc>,
    /// When the clean finished
    pub finished_at: DateTime<Utc>,
    /// Whether nothing was changed on purpose
    pub dry_run: bool,
    /// Duplicate groups selected
    pub groups: usize,
    /// Members replaced by hard links
    pub linked: usize,
    /// Members that already shared the canonical inode
    pub already_linked: usize,
    /// Members skipped because they lie outside the root
    pub outside_root: usize,
    /// Members skipped because their path is a symbolic link
    pub symlinks: usize,
    /// Bytes freed by the replaced members
    pub reclaimed_bytes: u64,
    /// Members left untouched because of an error
    pub member_failures: Vec<FailureEntry>,
    /// Groups that failed as a whole
    pub unit_failures: Vec<FailureEntry>,
    /// Whether no group qualified
    pub no_duplicates: bool,
    /// Whether Ctrl+C stopped the clean early
    pub interrupted: bool,
}

impl CleanSummary {
    fn empty(root: PathBuf, store: PathBuf, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            root,
            store,
            started_at,
            finished_at: started_at,
            dry_run,
            groups: 0,
            linked: 0,
            already_linked: 0,
            outside_root: 0,
            symlinks: 0,
            reclaimed_bytes: 0,
            member_failures: Vec::new(),
            unit_failures: Vec::new(),
            no_duplicates: false,
            interrupted: false,
        }
    }

    /// Whether any member or unit failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.member_failures.is_empty() || !self.unit_failures.is_empty()
    }

    /// Process exit code for this outcome.
    ///
    /// Finding no duplicates is a success.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.interrupted {
            ExitCode::Interrupted
        } else if self.has_failures() {
            ExitCode::PartialSuccess
        } else {
            ExitCode::Success
        }
    }
}

/// Hard-link every qualifying duplicate group under the root.
///
/// # Errors
///
/// Returns [`CommandError`] if the root is invalid or the store is missing
/// or invalid. Per-member and per-group failures are in the summary.
pub fn run_clean(options: &CleanOptions) -> Result<CleanSummary, CommandError> {
    let started_at = Utc::now();
    let root = resolve_root(&options.root)?;
    let db = absolute_path(&options.db)?;

    let groups = IndexStore::open_existing(&db)?
        .with_retry_policy(options.retry)
        .group_duplicates()?;

    let mut summary = CleanSummary::empty(root, db, started_at, options.dry_run);
    if groups.is_empty() {
        log::info!("No duplicates found in {}", summary.store.display());
        summary.no_duplicates = true;
        summary.finished_at = Utc::now();
        return Ok(summary);
    }
    summary.groups = groups.len();
    log::info!(
        "Consolidating {} duplicate group(s) under {}{}",
        groups.len(),
        summary.root.display(),
        if options.dry_run { " (dry run)" } else { "" }
    );

    let config = MergeConfig::new(&summary.root)
        .with_dry_run(options.dry_run)
        .with_verify_mtime(options.verify_mtime);
    let db = &summary.store;
    let retry = options.retry;

    let mut dispatcher = Dispatcher::new(options.workers);
    if let Some(ref flag) = options.shutdown_flag {
        dispatcher = dispatcher.with_shutdown_flag(Arc::clone(flag));
    }
    if let Some(ref progress) = options.progress {
        dispatcher = dispatcher.with_progress_callback(Arc::clone(progress));
    }

    let report = dispatcher.run(
        "clean",
        groups,
        || IndexStore::open_existing(db).map(|store| store.with_retry_policy(retry)),
        |store, group| merge_group(store, group, &config).map_err(UnitError::from),
    );

    for (_, group) in report.successes() {
        summary.linked += group.linked.len();
        summary.already_linked += group.already_linked.len();
        summary.outside_root += group.outside_root;
        summary.symlinks += group.symlinks;
        summary.reclaimed_bytes += group.reclaimed_bytes;
        summary.member_failures.extend(
            group
                .failures
                .iter()
                .map(|(path, e)| FailureEntry::new(path.to_string_lossy(), e)),
        );
    }
    summary.unit_failures = unit_failures(&report);
    summary.interrupted = report.interrupted;
    summary.finished_at = Utc::now();

    log::info!(
        "Clean complete: {} linked, {} already linked, {} member failure(s), {} unit failure(s)",
        summary.linked,
        summary.already_linked,
        summary.member_failures.len(),
        summary.unit_failures.len()
    );
    Ok(summary)
}
