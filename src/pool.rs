//! Worker-pool dispatcher.
//!
//! # Overview
//!
//! [`Dispatcher::run`] executes independent units of work (directories in
//! the scan phase, duplicate groups in the merge phase) on a bounded rayon
//! pool. Each pool thread opens its own store connection through the `open`
//! closure the first time it picks up a unit, and reuses it for every later
//! unit, so a run opens at most one connection per worker.
//!
//! Every unit yields exactly one [`UnitOutcome`], whether it succeeded,
//! failed, panicked, or was never started because shutdown was requested.
//! Nothing is dropped on the floor.
//!
//! # Example
//!
//! ```no_run
//! use dupelink::index::IndexStore;
//! use dupelink::pool::Dispatcher;
//! use std::path::{Path, PathBuf};
//!
//! let dirs = vec![PathBuf::from("/data/a"), PathBuf::from("/data/b")];
//! let report = Dispatcher::new(4).run(
//!     "scan",
//!     dirs,
//!     || IndexStore::open_existing(Path::new("dedup.db")),
//!     |store, dir| Ok(store.lookup(dir)?.is_some()),
//! );
//! println!("{} failed", report.failure_count());
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;

use crate::index::IndexError;
use crate::merge::MergeError;
use crate::progress::ProgressCallback;
use crate::scanner::ScanError;

/// A unit of work that can be named in logs and summaries.
pub trait WorkUnit: Send {
    /// Human-readable identifier for the unit.
    fn label(&self) -> String;
}

impl WorkUnit for PathBuf {
    fn label(&self) -> String {
        self.display().to_string()
    }
}

/// Why a unit of work did not complete.
#[derive(thiserror::Error, Debug)]
pub enum UnitError {
    /// Directory reconciliation failed.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Group consolidation failed.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] IndexError),

    /// The worker could not open its store connection.
    #[error("index store unavailable: {0}")]
    StoreUnavailable(String),

    /// The unit panicked; the worker survived.
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// Shutdown was requested before the unit started.
    #[error("interrupted before start")]
    Interrupted,
}

/// The result of one unit of work.
#[derive(Debug)]
pub struct UnitOutcome<U, T> {
    /// The unit that ran
    pub unit: U,
    /// What it produced
    pub result: Result<T, UnitError>,
}

/// Outcomes of every dispatched unit.
#[derive(Debug)]
pub struct RunReport<U, T> {
    /// One outcome per unit
    pub outcomes: Vec<UnitOutcome<U, T>>,
    /// Whether shutdown was requested during the run
    pub interrupted: bool,
}

impl<U, T> RunReport<U, T> {
    /// Successful results.
    pub fn successes(&self) -> impl Iterator<Item = (&U, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|value| (&o.unit, value)))
    }

    /// Failed units, excluding ones that never started.
    pub fn failures(&self) -> impl Iterator<Item = (&U, &UnitError)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Err(UnitError::Interrupted) | Ok(_) => None,
            Err(e) => Some((&o.unit, e)),
        })
    }

    /// Number of successful units.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    /// Number of failed units (not counting interrupted ones).
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Number of units skipped because of shutdown.
    #[must_use]
    pub fn interrupted_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Err(UnitError::Interrupted)))
            .count()
    }

    /// Total number of units.
    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

/// Default worker count: the number of available processing units.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Runs units of work on a bounded thread pool.
#[derive(Clone)]
pub struct Dispatcher {
    workers: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher with `workers` threads (at least one).
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            shutdown_flag: None,
            progress_callback: None,
        }
    }

    /// Set the shutdown flag; units not yet started are skipped once it is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Run `work` over every unit and collect one outcome per unit.
    ///
    /// `open` is called at most once per pool thread to create its store
    /// handle. If it fails, the units that thread picks up report
    /// [`UnitError::StoreUnavailable`].
    pub fn run<U, S, T, O, W>(&self, phase: &str, units: Vec<U>, open: O, work: W) -> RunReport<U, T>
    where
        U: WorkUnit,
        S: Send,
        T: Send,
        O: Fn() -> Result<S, IndexError> + Sync + Send,
        W: Fn(&S, &U) -> Result<T, UnitError> + Sync + Send,
    {
        let total = units.len();
        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_start(phase, total);
        }
        log::info!(
            "Dispatching {} {} unit(s) across {} worker(s)",
            total,
            phase,
            self.workers
        );

        let completed = AtomicUsize::new(0);
        let execute = || -> Vec<UnitOutcome<U, T>> {
            // One slot per thread of the pool we are running on; a slot is
            // only ever locked by its own thread.
            let stores: Vec<Mutex<Option<Result<S, String>>>> = (0..rayon::current_num_threads())
                .map(|_| Mutex::new(None))
                .collect();
            units
                .into_par_iter()
                .map(|unit| {
                    let result = if self.is_shutdown_requested() {
                        Err(UnitError::Interrupted)
                    } else {
                        let slot = rayon::current_thread_index()
                            .unwrap_or(0)
                            .min(stores.len() - 1);
                        let mut guard = stores[slot]
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        let store = guard.get_or_insert_with(|| {
                            open().map_err(|e| {
                                log::error!("Worker failed to open index store: {}", e);
                                e.to_string()
                            })
                        });
                        self.run_unit(store, &unit, &work)
                    };
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(ref callback) = self.progress_callback {
                        callback.on_progress(done, &unit.label());
                    }
                    UnitOutcome { unit, result }
                })
                .collect()
        };

        let outcomes = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
        {
            Ok(pool) => pool.install(execute),
            Err(e) => {
                log::warn!(
                    "Failed to create worker pool ({}), using global pool with {} threads",
                    e,
                    rayon::current_num_threads()
                );
                execute()
            }
        };

        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_end(phase);
        }

        let interrupted = self.is_shutdown_requested();
        if interrupted {
            log::info!("{}: interrupted by shutdown signal", phase);
        }
        RunReport {
            outcomes,
            interrupted,
        }
    }

    fn run_unit<U, S, T, W>(
        &self,
        store: &Result<S, String>,
        unit: &U,
        work: &W,
    ) -> Result<T, UnitError>
    where
        U: WorkUnit,
        W: Fn(&S, &U) -> Result<T, UnitError>,
    {
        let store = store
            .as_ref()
            .map_err(|e| UnitError::StoreUnavailable(e.clone()))?;

        match catch_unwind(AssertUnwindSafe(|| work(store, unit))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                log::warn!("Unit {} failed: {}", unit.label(), e);
                Err(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("Unit {} panicked: {}", unit.label(), message);
                Err(UnitError::Panicked(message))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
