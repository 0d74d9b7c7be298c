//! dupelink - content-addressed file deduplication
//!
//! Scans a directory tree into a SQLite index of BLAKE3 digests, re-hashing
//! only files whose mtime changed, and consolidates identical files into
//! hard links to one canonical copy. Directory scans and group merges run on
//! a bounded worker pool sharing the one store file.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod merge;
pub mod output;
pub mod pool;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;

use crate::cli::{Cli, Commands, OutputFormat};
use crate::commands::{run_clean, run_scan, run_stat, CleanOptions, ScanOptions};
use crate::config::Settings;
use crate::error::ExitCode;
use crate::output::{text, JsonOutput};
use crate::progress::{Progress, ProgressCallback};

/// Run a parsed command line and return the process exit code.
///
/// # Errors
///
/// Returns an error for invalid configuration, precondition failures (bad
/// root, missing or invalid store) and output failures.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(cli.config.as_deref(), &cli.command.overrides())
        .context("failed to load configuration")?;
    log::debug!("Effective settings: {:?}", settings);

    let progress: Option<Arc<dyn ProgressCallback>> = if !cli.quiet && cli.command.wants_progress()
    {
        Some(Arc::new(Progress::new(false)))
    } else {
        None
    };
    let format = cli.command.store_args().output;
    let command = cli.command.name();

    let mut stdout = std::io::stdout().lock();
    let exit_code = match cli.command {
        Commands::Scan(args) => {
            let handler = signal::install_handler()?;
            let mut options = ScanOptions::new(&args.root, &settings.db)
                .with_workers(settings.jobs())
                .with_walker(settings.walker_config())
                .with_hasher(settings.hasher())
                .with_retry(settings.retry_policy())
                .with_shutdown_flag(handler.get_flag());
            if let Some(progress) = progress {
                options = options.with_progress(progress);
            }
            let summary = run_scan(&options)
                .with_context(|| format!("scan of {} failed", args.root.display()))?;
            let exit_code = summary.exit_code();
            match format {
                OutputFormat::Text => text::write_scan(&mut stdout, &summary)?,
                OutputFormat::Json => {
                    JsonOutput::new(command, &summary, exit_code).write_to(&mut stdout)?;
                }
            }
            exit_code
        }
        Commands::Stat(_) => {
            let summary = run_stat(&settings.db)
                .with_context(|| format!("cannot read store {}", settings.db.display()))?;
            match format {
                OutputFormat::Text => text::write_stat(&mut stdout, &summary)?,
                OutputFormat::Json => {
                    JsonOutput::new(command, &summary, ExitCode::Success).write_to(&mut stdout)?;
                }
            }
            ExitCode::Success
        }
        Commands::Clean(args) => {
            let handler = signal::install_handler()?;
            let mut options = CleanOptions::new(&args.root, &settings.db)
                .with_workers(settings.jobs())
                .with_dry_run(args.dry_run)
                .with_verify_mtime(settings.verify_mtime)
                .with_retry(settings.retry_policy())
                .with_shutdown_flag(handler.get_flag());
            if let Some(progress) = progress {
                options = options.with_progress(progress);
            }
            let summary = run_clean(&options)
                .with_context(|| format!("clean of {} failed", args.root.display()))?;
            let exit_code = summary.exit_code();
            match format {
                OutputFormat::Text => text::write_clean(&mut stdout, &summary)?,
                OutputFormat::Json => {
                    JsonOutput::new(command, &summary, exit_code).write_to(&mut stdout)?;
                }
            }
            exit_code
        }
    };
    stdout.flush()?;
    Ok(exit_code)
}
