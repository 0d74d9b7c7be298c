//! JSON output for command summaries.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "command": "clean",
//!   "exit_code": 0,
//!   "exit_code_name": "DL000",
//!   "summary": {
//!     "root": "/data",
//!     "store": "/data/dedup.db",
//!     "groups": 3,
//!     "linked": 4,
//!     "reclaimed_bytes": 51200,
//!     "...": "..."
//!   }
//! }
//! ```

use std::io::Write;

use serde::Serialize;

use super::OutputError;
use crate::error::ExitCode;

/// A summary wrapped with the command name and exit code.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput<'a, T: Serialize> {
    /// Command that produced the summary
    pub command: &'static str,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "DL000")
    pub exit_code_name: &'static str,
    /// The command summary
    pub summary: &'a T,
}

impl<'a, T: Serialize> JsonOutput<'a, T> {
    /// Wrap `summary` for output.
    #[must_use]
    pub fn new(command: &'static str, summary: &'a T, exit_code: ExitCode) -> Self {
        Self {
            command,
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix(),
            summary,
        }
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write pretty-printed JSON and a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), OutputError> {
        let json = self.to_json_pretty()?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}
