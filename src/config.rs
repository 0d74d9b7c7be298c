//! Layered configuration.
//!
//! Settings are merged with figment, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file: `--config FILE`, or `config.toml` in the platform config
//!    directory when present
//! 3. Environment variables prefixed `DUPELINK_` (e.g. `DUPELINK_JOBS=8`)
//! 4. Command-line flags
//!
//! ```toml
//! db = "/var/lib/dupelink/dedup.db"
//! jobs = 8
//! skip_hidden = true
//! ignore_patterns = ["*.part", "node_modules/"]
//! busy_retries = 12
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::index::RetryPolicy;
use crate::pool::default_workers;
use crate::scanner::{Hasher, WalkerConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_DEPTH};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DUPELINK_";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// A layer could not be parsed or has a wrongly typed value.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

/// Effective settings for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Index store file
    pub db: PathBuf,
    /// Worker count; unset means one per available CPU
    pub jobs: Option<usize>,
    /// Hasher read size in bytes
    pub chunk_size: usize,
    /// Follow symlinked files and directories
    pub follow_symlinks: bool,
    /// Skip dot-files and dot-directories
    pub skip_hidden: bool,
    /// Depth bound while following symlinks
    pub max_depth: usize,
    /// Gitignore-style patterns to leave out of scans
    pub ignore_patterns: Vec<String>,
    /// Check each member's mtime against its record before linking
    pub verify_mtime: bool,
    /// Attempts per store operation while the database is busy
    pub busy_retries: u32,
    /// First busy backoff in milliseconds (doubles per attempt)
    pub busy_backoff_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            db: PathBuf::from("dedup.db"),
            jobs: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            follow_symlinks: false,
            skip_hidden: false,
            max_depth: DEFAULT_MAX_DEPTH,
            ignore_patterns: Vec::new(),
            verify_mtime: true,
            busy_retries: retry.max_attempts,
            busy_backoff_ms: u64::try_from(retry.initial_backoff.as_millis()).unwrap_or(10),
        }
    }
}

/// Command-line values that override every other layer.
///
/// Unset fields leave lower layers untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    /// `--db`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<PathBuf>,
    /// `--jobs`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
    /// `--chunk-size`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    /// `--follow-symlinks`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_symlinks: Option<bool>,
    /// `--skip-hidden`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_hidden: Option<bool>,
    /// `--ignore`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_patterns: Option<Vec<String>>,
    /// `--no-verify-mtime`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_mtime: Option<bool>,
}

impl Settings {
    /// Default config file location, if the platform has one.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "dupelink", "dupelink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Build the layered figment without extracting it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `config_file` is given but missing.
    pub fn figment(config_file: Option<&Path>, overrides: &Overrides) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match config_file {
            Some(path) if !path.is_file() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => {
                log::debug!("Loading config from {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = Self::default_config_path().filter(|p| p.is_file()) {
                    log::debug!("Loading config from {}", path.display());
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides)))
    }

    /// Load settings from every layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is missing or any layer is invalid.
    pub fn load(config_file: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::figment(config_file, overrides)?
            .extract()
            .map_err(|e| ConfigError::Invalid(Box::new(e)))
    }

    /// Effective worker count.
    #[must_use]
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(default_workers).max(1)
    }

    /// Busy-retry schedule for store connections.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.busy_retries.max(1),
            initial_backoff: Duration::from_millis(self.busy_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    /// Enumeration and filtering settings.
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig::default()
            .with_follow_symlinks(self.follow_symlinks)
            .with_skip_hidden(self.skip_hidden)
            .with_max_depth(self.max_depth)
            .with_ignore_patterns(self.ignore_patterns.clone())
    }

    /// Content hasher with the configured chunk size.
    #[must_use]
    pub fn hasher(&self) -> Hasher {
        Hasher::with_chunk_size(self.chunk_size)
    }
}
