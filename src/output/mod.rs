//! Summary printers.
//!
//! Every command summary can be written as human-readable text or as JSON:
//!
//! ```no_run
//! use dupelink::commands::run_stat;
//! use dupelink::error::ExitCode;
//! use dupelink::output::{text, JsonOutput};
//! use std::path::Path;
//!
//! let summary = run_stat(Path::new("dedup.db")).unwrap();
//! text::write_stat(&mut std::io::stdout(), &summary).unwrap();
//!
//! let json = JsonOutput::new("stat", &summary, ExitCode::Success);
//! println!("{}", json.to_json_pretty().unwrap());
//! ```

pub mod json;
pub mod text;

pub use json::JsonOutput;

/// Errors raised while printing a summary.
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error while writing output: {0}")]
    Io(#[from] std::io::Error),
}
