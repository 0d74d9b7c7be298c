//! `scan`: enumerate, then reconcile every directory in parallel.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{absolute_path, resolve_root, unit_failures, CommandError, FailureEntry};
use crate::error::ExitCode;
use crate::index::{IndexStore, RetryPolicy};
use crate::pool::{default_workers, Dispatcher, UnitError};
use crate::progress::ProgressCallback;
use crate::scanner::{
    enumerate_directories, reconcile_directory, EntryFilter, HashError, Hasher, ScanError, WalkerConfig,
};

/// Inputs for a scan.
#[derive(Clone)]
pub struct ScanOptions {
    /// Directory tree to index
    pub root: PathBuf,
    /// Index store file (created if missing)
    pub db: PathBuf,
    /// Worker count
    pub workers: usize,
    /// Enumeration and filtering rules
    pub walker: WalkerConfig,
    /// File hasher
    pub hasher: Hasher,
    /// Busy-retry schedule for worker connections
    pub retry: RetryPolicy,
    /// Stops dispatch of new directories when set
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Progress reporting
    pub progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOptions")
            .field("root", &self.root)
            .field("db", &self.db)
            .field("workers", &self.workers)
            .field("walker", &self.walker)
            .field("hasher", &self.hasher)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ScanOptions {
    /// Scan `root` into the store at `db` with default settings.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, db: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            db: db.into(),
            workers: default_workers(),
            walker: WalkerConfig::default(),
            hasher: Hasher::new(),
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

    /// Set enumeration and filtering rules.
    #[must_use]
    pub fn with_walker(mut self, walker: WalkerConfig) -> Self {
        self.walker = walker;
        self
    }

    /// Set the hasher.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Hasher) -> Self {
        self.hasher = hasher;
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

/// What a scan did.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    /// Absolute root that was scanned
    pub root: PathBuf,
    /// Absolute store path
    pub store: PathBuf,
    /// When the scan started
    pub started_at: DateTime<Utc>,
    /// When the scan finished
    pub finished_at: DateTime<Utc>,
    /// Directories enumerated
    pub directories: usize,
    /// Records inserted
    pub files_added: usize,
    /// Records rehashed
    pub files_updated: usize,
    /// Files left unchanged
    pub files_unchanged: usize,
    /// Files skipped because of an error
    pub file_failures: Vec<FailureEntry>,
    /// Directories that failed as a whole
    pub unit_failures: Vec<FailureEntry>,
    /// Whether Ctrl+C stopped the scan early
    pub interrupted: bool,
}

impl ScanSummary {
    /// Records inserted or updated.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.files_added + self.files_updated
    }

    /// Whether any file or unit failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.file_failures.is_empty() || !self.unit_failures.is_empty()
    }

    /// Process exit code for this outcome.
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

fn failure_for(error: &ScanError) -> FailureEntry {
    let path = match error {
        ScanError::PermissionDenied(p)
        | ScanError::NotFound(p)
        | ScanError::NotADirectory(p)
        | ScanError::NonUtf8Path(p)
        | ScanError::Modified(p)
        | ScanError::Io { path: p, .. }
        | ScanError::Hash(
            HashError::NotFound(p) | HashError::PermissionDenied(p) | HashError::Io { path: p, .. },
        ) => p.to_string_lossy().into_owned(),
        ScanError::Index(_) => String::new(),
    };
    FailureEntry::new(path, error)
}

/// Index every file under the root.
///
/// Creates the store if needed, never merges.
///
/// # Errors
///
/// Returns [`CommandError`] if the root is invalid or the store cannot be
/// created; everything after that is reported in the summary.
pub fn run_scan(options: &ScanOptions) -> Result<ScanSummary, CommandError> {
    let started_at = Utc::now();
    let root = resolve_root(&options.root)?;
    let db = absolute_path(&options.db)?;

    // Create the schema once, before workers open their own connections.
    drop(IndexStore::open(&db)?);
    log::info!("Scanning {} into {}", root.display(), db.display());

    if let Some(ref progress) = options.progress {
        progress.on_phase_start("enumerate", 0);
    }
    let listing = enumerate_directories(&root, &options.walker).map_err(|e| match e {
        ScanError::NotFound(p) => CommandError::RootNotFound(p),
        ScanError::NotADirectory(p) => CommandError::RootNotADirectory(p),
        ScanError::Io { path, source } => CommandError::Io { path, source },
        other => CommandError::Io {
            path: root.clone(),
            source: std::io::Error::other(other.to_string()),
        },
    })?;
    if let Some(ref progress) = options.progress {
        progress.on_phase_end("enumerate");
    }

    let directories = listing.directories.len();
    let mut enumeration_failures: Vec<FailureEntry> =
        listing.errors.iter().map(failure_for).collect();

    let filter = EntryFilter::new(&root, &options.walker).with_store_path(&db);
    let hasher = &options.hasher;
    let retry = options.retry;

    let mut dispatcher = Dispatcher::new(options.workers);
    if let Some(ref flag) = options.shutdown_flag {
        dispatcher = dispatcher.with_shutdown_flag(Arc::clone(flag));
    }
    if let Some(ref progress) = options.progress {
        dispatcher = dispatcher.with_progress_callback(Arc::clone(progress));
    }

    let report = dispatcher.run(
        "scan",
        listing.directories,
        || IndexStore::open_existing(&db).map(|store| store.with_retry_policy(retry)),
        |store, dir| reconcile_directory(dir, store, hasher, &filter).map_err(UnitError::from),
    );

    let mut summary = ScanSummary {
        root,
        store: db,
        started_at,
        finished_at: started_at,
        directories,
        files_added: 0,
        files_updated: 0,
        files_unchanged: 0,
        file_failures: Vec::new(),
        unit_failures: Vec::new(),
        interrupted: report.interrupted,
    };

    for (_, dir_report) in report.successes() {
        summary.files_added += dir_report.added;
        summary.files_updated += dir_report.updated;
        summary.files_unchanged += dir_report.unchanged;
        summary
            .file_failures
            .extend(dir_report.errors.iter().map(failure_for));
    }
    enumeration_failures.extend(unit_failures(&report));
    summary.unit_failures = enumeration_failures;
    summary.finished_at = Utc::now();

    log::info!(
        "Scan complete: {} added, {} updated, {} unchanged, {} file failure(s), {} unit failure(s)",
        summary.files_added,
        summary.files_updated,
        summary.files_unchanged,
        summary.file_failures.len(),
        summary.unit_failures.len()
    );
    Ok(summary)
}
