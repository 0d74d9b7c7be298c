//! BLAKE3 content hasher with bounded-memory streaming.
//!
//! # Overview
//!
//! [`Hasher`] reads a file in fixed-size chunks and feeds each chunk into a
//! BLAKE3 state, so memory use is independent of file size. The resulting
//! [`Digest`] depends only on the file's bytes: never on its path, mtime or
//! inode.
//!
//! Digests are persisted in the index as lower-case hex text; use
//! [`digest_to_hex`] and [`hex_to_digest`] to convert.
//!
//! # Example
//!
//! ```no_run
//! use dupelink::scanner::{digest_to_hex, Hasher};
//! use std::path::Path;
//!
//! let hasher = Hasher::new();
//! let digest = hasher.digest(Path::new("Cargo.toml")).unwrap();
//! println!("{}", digest_to_hex(&digest));
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use super::HashError;

/// A BLAKE3 content digest (32 bytes).
pub type Digest = [u8; 32];

/// Default read size for each chunk fed to the hash state.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest accepted chunk size; smaller values are clamped up to this.
pub const MIN_CHUNK_SIZE: usize = 512;

/// Streaming file hasher.
///
/// `Hasher` is cheap to clone and holds no per-file state, so a single
/// instance can be shared by every worker thread.
#[derive(Debug, Clone)]
pub struct Hasher {
    chunk_size: usize,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher that reads [`DEFAULT_CHUNK_SIZE`] bytes at a time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Create a hasher with a custom chunk size (clamped to [`MIN_CHUNK_SIZE`]).
    #[must_use]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE),
        }
    }

    /// The configured chunk size in bytes.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Compute the digest of a file's full content.
    ///
    /// # Errors
    ///
    /// Returns a [`HashError`] if the file cannot be opened or any read fails
    /// partway through. No partial digest is ever returned.
    pub fn digest(&self, path: &Path) -> Result<Digest, HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        self.digest_reader(file)
            .map_err(|e| HashError::from_io(path, e))
    }

    /// Compute the digest of everything readable from `reader`.
    ///
    /// # Errors
    ///
    /// Propagates the first non-`Interrupted` read error.
    pub fn digest_reader<R: Read>(&self, mut reader: R) -> io::Result<Digest> {
        let mut state = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            state.update(&buffer[..read]);
        }

        Ok(*state.finalize().as_bytes())
    }
}

/// Error returned when a stored digest string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest: expected 64 hex characters, got {0:?}")]
pub struct DigestParseError(pub String);

/// Render a digest as 64 lower-case hex characters.
#[must_use]
pub fn digest_to_hex(digest: &Digest) -> String {
    blake3::Hash::from(*digest).to_hex().to_string()
}

/// Parse a 64-character hex string back into a digest.
///
/// # Errors
///
/// Returns [`DigestParseError`] for anything other than exactly 64 hex digits.
pub fn hex_to_digest(hex: &str) -> Result<Digest, DigestParseError> {
    blake3::Hash::from_hex(hex)
        .map(|hash| *hash.as_bytes())
        .map_err(|_| DigestParseError(hex.to_string()))
}
