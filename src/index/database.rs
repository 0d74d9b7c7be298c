//! SQLite-backed index store.
//!
//! # Overview
//!
//! The store is a single SQLite file holding one `files` table keyed by
//! path. Every worker opens its own [`IndexStore`] connection; SQLite
//! serializes writers with a file lock, and the store retries operations
//! that hit a busy lock with exponential backoff (see [`RetryPolicy`]).
//!
//! The schema is created idempotently by [`IndexStore::open`] and stamped
//! with `PRAGMA user_version`, so [`IndexStore::open_existing`] can tell a
//! valid store apart from an unrelated SQLite file.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};

use super::record::{HashGroup, Mtime, Record, StoreStats};
use crate::scanner::{digest_to_hex, hex_to_digest};

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// How long SQLite itself waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(100);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS files (
        path TEXT NOT NULL UNIQUE,
        mtime_sec INTEGER NOT NULL,
        mtime_nsec INTEGER NOT NULL,
        digest TEXT NOT NULL,
        inode INTEGER NOT NULL,
        canonical_path TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_files_digest ON files(digest);
";

const RECORD_COLUMNS: &str = "path, mtime_sec, mtime_nsec, digest, inode, canonical_path";

/// Errors that can occur in index store operations.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The store file does not exist.
    #[error("Index store not found: {0}")]
    NotFound(PathBuf),

    /// The file exists but is not a dupelink index store.
    #[error("Not a valid index store: {path}: {reason}")]
    InvalidStore {
        /// Path of the rejected file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// `insert` was called for a path that already has a record.
    #[error("Record already exists: {0}")]
    Conflict(PathBuf),

    /// `update` or `update_merge` was called for a path without a record.
    #[error("No record for path: {0}")]
    MissingRecord(PathBuf),

    /// The store stayed locked through every retry.
    #[error("Index store busy after {attempts} attempts")]
    Busy {
        /// Number of attempts made
        attempts: u32,
    },

    /// A stored row could not be decoded.
    #[error("Corrupt record for {path}: {reason}")]
    CorruptRecord {
        /// Path column of the bad row
        path: String,
        /// Decoding failure
        reason: String,
    },

    /// The path cannot be stored because it is not valid UTF-8.
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    /// Any other SQLite failure.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Retry schedule for operations that find the store locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub max_attempts: u32,
    /// Delay after the first busy attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th busy failure (1-based).
    ///
    /// Doubles from `initial_backoff` and saturates at `max_backoff`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Run `op`, retrying while SQLite reports the database busy or locked.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Busy`] once `max_attempts` is exhausted, and
    /// [`IndexError::Sqlite`] for any non-busy failure.
    pub fn run<T>(&self, mut op: impl FnMut() -> rusqlite::Result<T>) -> IndexResult<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) => {
                    if attempt >= max_attempts {
                        log::warn!("Index store still busy after {} attempts", attempt);
                        return Err(IndexError::Busy { attempts: attempt });
                    }
                    let delay = self.backoff(attempt);
                    log::debug!(
                        "Index store busy (attempt {}/{}), retrying in {:?}",
                        attempt,
                        max_attempts,
                        delay
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(IndexError::Sqlite(e)),
            }
        }
    }
}

fn sqlite_code(error: &rusqlite::Error) -> Option<ErrorCode> {
    match error {
        rusqlite::Error::SqliteFailure(e, _) => Some(e.code),
        _ => None,
    }
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        sqlite_code(error),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_constraint(error: &IndexError) -> bool {
    matches!(error, IndexError::Sqlite(e) if sqlite_code(e) == Some(ErrorCode::ConstraintViolation))
}

fn path_str(path: &Path) -> IndexResult<&str> {
    path.to_str()
        .ok_or_else(|| IndexError::NonUtf8Path(path.to_path_buf()))
}

/// Raw column values of one `files` row.
struct RawRecord {
    path: String,
    mtime_sec: i64,
    mtime_nsec: i64,
    digest: String,
    inode: i64,
    canonical_path: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            mtime_sec: row.get(1)?,
            mtime_nsec: row.get(2)?,
            digest: row.get(3)?,
            inode: row.get(4)?,
            canonical_path: row.get(5)?,
        })
    }

    fn into_record(self) -> IndexResult<Record> {
        let digest = hex_to_digest(&self.digest).map_err(|e| IndexError::CorruptRecord {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let nanos = u32::try_from(self.mtime_nsec).map_err(|_| IndexError::CorruptRecord {
            path: self.path.clone(),
            reason: format!("mtime nanoseconds out of range: {}", self.mtime_nsec),
        })?;

        Ok(Record {
            path: PathBuf::from(self.path),
            mtime: Mtime::new(self.mtime_sec, nanos),
            digest,
            // Inodes are stored bit-for-bit in a signed column.
            inode: self.inode as u64,
            canonical_path: self.canonical_path.map(PathBuf::from),
        })
    }
}

/// A connection to the persistent index store.
///
/// Each worker thread owns its own `IndexStore`; the type is `Send` but not
/// `Sync`.
pub struct IndexStore {
    conn: Connection,
    path: PathBuf,
    retry: RetryPolicy,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("path", &self.path)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl IndexStore {
    /// Open the store at `path`, creating the file and schema if needed.
    ///
    /// Safe to call against an existing, populated store.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidStore`] if `path` is not a SQLite
    /// database or carries a newer schema version.
    pub fn open(path: &Path) -> IndexResult<Self> {
        let conn = Connection::open(path).map_err(|e| classify_open_error(path, e))?;
        let store = Self::configure(conn, path)?;
        store.enable_wal()?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Open an already-initialized store without creating anything.
    ///
    /// # Errors
    ///
    /// - [`IndexError::NotFound`] if the file does not exist
    /// - [`IndexError::InvalidStore`] if it is not an initialized index store
    pub fn open_existing(path: &Path) -> IndexResult<Self> {
        if !path.is_file() {
            return Err(IndexError::NotFound(path.to_path_buf()));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn =
            Connection::open_with_flags(path, flags).map_err(|e| classify_open_error(path, e))?;
        let store = Self::configure(conn, path)?;
        store.enable_wal()?;
        store.validate_schema()?;
        Ok(store)
    }

    /// Open an already-initialized store for reading only.
    ///
    /// No pragma or statement writes to the file; every write operation on
    /// the returned handle fails. SQLite may still create its transient
    /// `-wal`/`-shm` files next to a WAL-mode store while the connection is
    /// open.
    ///
    /// # Errors
    ///
    /// Same as [`open_existing`](Self::open_existing).
    pub fn open_read_only(path: &Path) -> IndexResult<Self> {
        if !path.is_file() {
            return Err(IndexError::NotFound(path.to_path_buf()));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn =
            Connection::open_with_flags(path, flags).map_err(|e| classify_open_error(path, e))?;
        let store = Self::configure(conn, path)?;
        store.validate_schema()?;
        Ok(store)
    }

    /// Replace the busy-retry schedule.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Path of the underlying store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configure(conn: Connection, path: &Path) -> IndexResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let store = Self {
            conn,
            path: path.to_path_buf(),
            retry: RetryPolicy::default(),
        };

        // Probing the schema first turns "file is not a database" into a
        // clean InvalidStore before any pragma tries to write.
        store
            .retry
            .run(|| {
                store
                    .conn
                    .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
                        row.get::<_, i64>(0)
                    })
            })
            .map_err(|e| store.invalid_if_not_db(e))?;

        Ok(store)
    }

    fn enable_wal(&self) -> IndexResult<()> {
        let mode = self.retry.run(|| {
            self.conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        })?;
        if !mode.eq_ignore_ascii_case("wal") {
            log::warn!(
                "Index store {} is using journal mode '{}' instead of WAL",
                self.path.display(),
                mode
            );
        }
        Ok(())
    }

    fn invalid_if_not_db(&self, error: IndexError) -> IndexError {
        match error {
            IndexError::Sqlite(e) if sqlite_code(&e) == Some(ErrorCode::NotADatabase) => {
                IndexError::InvalidStore {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }
            }
            other => other,
        }
    }

    fn user_version(&self) -> IndexResult<i32> {
        self.retry.run(|| {
            self.conn
                .query_row("PRAGMA user_version", [], |row| row.get(0))
        })
    }

    fn ensure_schema(&self) -> IndexResult<()> {
        let version = self.user_version()?;
        if version > SCHEMA_VERSION {
            return Err(IndexError::InvalidStore {
                path: self.path.clone(),
                reason: format!("schema version {version} is newer than supported {SCHEMA_VERSION}"),
            });
        }

        self.retry.run(|| self.conn.execute_batch(SCHEMA))?;
        if version < SCHEMA_VERSION {
            self.retry.run(|| {
                self.conn
                    .pragma_update(None, "user_version", SCHEMA_VERSION)
            })?;
            log::debug!("Initialized index schema at {}", self.path.display());
        }
        Ok(())
    }

    fn validate_schema(&self) -> IndexResult<()> {
        let version = self.user_version()?;
        if version != SCHEMA_VERSION {
            return Err(IndexError::InvalidStore {
                path: self.path.clone(),
                reason: format!("unexpected schema version {version}"),
            });
        }

        let has_table: bool = self.retry.run(|| {
            self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'files')",
                [],
                |row| row.get(0),
            )
        })?;
        if !has_table {
            return Err(IndexError::InvalidStore {
                path: self.path.clone(),
                reason: "missing files table".to_string(),
            });
        }
        Ok(())
    }

    /// Fetch the record for `path`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupt row.
    pub fn lookup(&self, path: &Path) -> IndexResult<Option<Record>> {
        let key = path_str(path)?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM files WHERE path = ?1");
        let raw = self.retry.run(|| {
            self.conn
                .query_row(&sql, params![key], RawRecord::from_row)
                .optional()
        })?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Conflict`] if a record for the path exists.
    pub fn insert(&self, record: &Record) -> IndexResult<()> {
        let key = path_str(&record.path)?;
        let canonical = record.canonical_path.as_deref().map(path_str).transpose()?;
        let digest = digest_to_hex(&record.digest);

        self.retry
            .run(|| {
                self.conn.execute(
                    "INSERT INTO files (path, mtime_sec, mtime_nsec, digest, inode, canonical_path)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        key,
                        record.mtime.secs,
                        i64::from(record.mtime.nanos),
                        digest,
                        record.inode as i64,
                        canonical
                    ],
                )
            })
            .map_err(|e| {
                if is_constraint(&e) {
                    IndexError::Conflict(record.path.clone())
                } else {
                    e
                }
            })?;
        Ok(())
    }

    /// Replace the mtime, digest and inode of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MissingRecord`] if the path has no record.
    pub fn update(
        &self,
        path: &Path,
        mtime: Mtime,
        digest: &crate::scanner::Digest,
        inode: u64,
    ) -> IndexResult<()> {
        let key = path_str(path)?;
        let digest = digest_to_hex(digest);
        let changed = self.retry.run(|| {
            self.conn.execute(
                "UPDATE files SET mtime_sec = ?2, mtime_nsec = ?3, digest = ?4, inode = ?5
                 WHERE path = ?1",
                params![key, mtime.secs, i64::from(mtime.nanos), digest, inode as i64],
            )
        })?;
        if changed == 0 {
            return Err(IndexError::MissingRecord(path.to_path_buf()));
        }
        Ok(())
    }

    /// Record that `path` was hard-linked onto `canonical_path`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MissingRecord`] if the path has no record.
    pub fn update_merge(
        &self,
        path: &Path,
        mtime: Mtime,
        inode: u64,
        canonical_path: &Path,
    ) -> IndexResult<()> {
        let key = path_str(path)?;
        let canonical = path_str(canonical_path)?;
        let changed = self.retry.run(|| {
            self.conn.execute(
                "UPDATE files SET mtime_sec = ?2, mtime_nsec = ?3, inode = ?4, canonical_path = ?5
                 WHERE path = ?1",
                params![key, mtime.secs, i64::from(mtime.nanos), inode as i64, canonical],
            )
        })?;
        if changed == 0 {
            return Err(IndexError::MissingRecord(path.to_path_buf()));
        }
        Ok(())
    }

    /// Digests shared by at least two unmerged records, ordered by digest.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupt digest.
    pub fn group_duplicates(&self) -> IndexResult<Vec<HashGroup>> {
        let rows: Vec<(String, i64)> = self.retry.run(|| {
            let mut stmt = self.conn.prepare_cached(
                "SELECT digest, COUNT(*) FROM files
                 WHERE canonical_path IS NULL
                 GROUP BY digest
                 HAVING COUNT(*) >= 2
                 ORDER BY digest",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })?;

        rows.into_iter()
            .map(|(hex, count)| {
                let digest = hex_to_digest(&hex).map_err(|e| IndexError::CorruptRecord {
                    path: String::new(),
                    reason: e.to_string(),
                })?;
                Ok(HashGroup {
                    digest,
                    member_count: usize::try_from(count).unwrap_or(0),
                })
            })
            .collect()
    }

    /// Every record carrying `digest`, merged or not.
    ///
    /// Unmerged records come first, each partition ordered by path.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupt row.
    pub fn members(&self, digest: &crate::scanner::Digest) -> IndexResult<Vec<Record>> {
        let hex = digest_to_hex(digest);
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM files WHERE digest = ?1
             ORDER BY canonical_path IS NOT NULL, path"
        );
        let raw: Vec<RawRecord> = self.retry.run(|| {
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![hex], RawRecord::from_row)?;
            rows.collect()
        })?;
        raw.into_iter().map(RawRecord::into_record).collect()
    }

    /// Total and merged record counts.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn stats(&self) -> IndexResult<StoreStats> {
        let (total, merged): (i64, i64) = self.retry.run(|| {
            self.conn.query_row(
                "SELECT COUNT(*), COUNT(canonical_path) FROM files",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })?;
        Ok(StoreStats {
            total_records: u64::try_from(total).unwrap_or(0),
            merged_records: u64::try_from(merged).unwrap_or(0),
        })
    }
}

fn classify_open_error(path: &Path, error: rusqlite::Error) -> IndexError {
    match sqlite_code(&error) {
        Some(ErrorCode::NotADatabase) => IndexError::InvalidStore {
            path: path.to_path_buf(),
            reason: error.to_string(),
        },
        Some(ErrorCode::CannotOpen) if !path.exists() => IndexError::NotFound(path.to_path_buf()),
        _ => IndexError::Sqlite(error),
    }
}
