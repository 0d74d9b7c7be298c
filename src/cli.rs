//! Command-line interface definitions for dupelink.
//!
//! Global options (verbosity, config file, JSON errors) come before the
//! subcommand. Flags that are also configuration keys are optional here so
//! unset flags leave the config file and environment layers in effect.
//!
//! # Example
//!
//! ```bash
//! # Index the current directory into ./dedup.db
//! dupelink scan
//!
//! # Index a tree with 8 workers, skipping dot-files
//! dupelink scan --root /data --db /var/lib/dupelink/data.db -j 8 --skip-hidden
//!
//! # Show how much of the index is already consolidated
//! dupelink stat --db /var/lib/dupelink/data.db
//!
//! # Preview, then perform, the hard-link merge
//! dupelink clean --root /data --db /var/lib/dupelink/data.db --dry-run
//! dupelink -v clean --root /data --db /var/lib/dupelink/data.db
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Overrides;

/// Content-addressed file deduplication with hard links.
///
/// dupelink indexes file contents (BLAKE3) into a SQLite store, re-hashing
/// only files whose mtime changed, and replaces duplicates with hard links
/// to a single canonical copy.
#[derive(Debug, Parser)]
#[command(name = "dupelink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Index every file under a directory (never modifies files)
    Scan(ScanArgs),
    /// Show record counts for an existing index store
    Stat(StatArgs),
    /// Replace indexed duplicates with hard links to one canonical copy
    Clean(CleanArgs),
}

/// Options shared by every command that touches the store.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Index store file [default: dedup.db]
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Output format for the summary
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `scan`.
#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    /// Directory tree to index
    #[arg(short = 'w', long, visible_alias = "workdir", value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Number of worker threads [default: available CPUs]
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Follow symbolic links to files and directories
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (starting with .)
    #[arg(long)]
    pub skip_hidden: bool,

    /// Gitignore-style pattern to leave out (repeatable)
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Hasher read size (e.g., 64KiB, 1MiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub chunk_size: Option<u64>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for `stat`.
#[derive(Debug, Clone, Args)]
pub struct StatArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}

/// Arguments for `clean`.
#[derive(Debug, Clone, Args)]
pub struct CleanArgs {
    /// Only members under this directory are linked
    #[arg(short = 'w', long, visible_alias = "workdir", value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Number of worker threads [default: available CPUs]
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Show what would be linked without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Link members even if their mtime changed since the scan
    #[arg(long)]
    pub no_verify_mtime: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Output format for command summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl Commands {
    /// Name of the subcommand, as used in JSON output.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Scan(_) => "scan",
            Commands::Stat(_) => "stat",
            Commands::Clean(_) => "clean",
        }
    }

    /// Store and output options of the subcommand.
    #[must_use]
    pub fn store_args(&self) -> &StoreArgs {
        match self {
            Commands::Scan(args) => &args.store,
            Commands::Stat(args) => &args.store,
            Commands::Clean(args) => &args.store,
        }
    }

    /// Whether a progress bar may be drawn for this invocation.
    #[must_use]
    pub fn wants_progress(&self) -> bool {
        let disabled = match self {
            Commands::Scan(args) => args.no_progress,
            Commands::Stat(_) => true,
            Commands::Clean(args) => args.no_progress,
        };
        !disabled && self.store_args().output == OutputFormat::Text
    }

    /// Configuration overrides from the flags that were given.
    #[must_use]
    pub fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            db: self.store_args().db.clone(),
            ..Overrides::default()
        };
        match self {
            Commands::Scan(args) => {
                overrides.jobs = args.jobs;
                overrides.follow_symlinks = args.follow_symlinks.then_some(true);
                overrides.skip_hidden = args.skip_hidden.then_some(true);
                if !args.ignore_patterns.is_empty() {
                    overrides.ignore_patterns = Some(args.ignore_patterns.clone());
                }
                overrides.chunk_size = args.chunk_size.and_then(|n| usize::try_from(n).ok());
            }
            Commands::Stat(_) => {}
            Commands::Clean(args) => {
                overrides.jobs = args.jobs;
                overrides.verify_mtime = args.no_verify_mtime.then_some(false);
            }
        }
        overrides
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use dupelink::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("64KiB").unwrap(), 65_536);
/// assert_eq!(parse_size("1MB").unwrap(), 1_000_000);
/// ```
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
