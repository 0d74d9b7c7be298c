//! Human-readable summaries.
//!
//! Sizes use IEC units via `bytesize`; timestamps are RFC 3339 in UTC.

use std::io::Write;

use bytesize::ByteSize;
use chrono::{DateTime, SecondsFormat, Utc};

use super::OutputError;
use crate::commands::{CleanSummary, FailureEntry, ScanSummary, StatSummary};

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn write_timing<W: Write>(
    w: &mut W,
    started_at: &DateTime<Utc>,
    finished_at: &DateTime<Utc>,
) -> Result<(), OutputError> {
    let elapsed = finished_at.signed_duration_since(*started_at);
    writeln!(
        w,
        "Started:  {}\nFinished: {} ({} ms)",
        timestamp(started_at),
        timestamp(finished_at),
        elapsed.num_milliseconds().max(0)
    )?;
    Ok(())
}

fn write_failures<W: Write>(
    w: &mut W,
    heading: &str,
    failures: &[FailureEntry],
) -> Result<(), OutputError> {
    if failures.is_empty() {
        return Ok(());
    }
    writeln!(w, "{} ({}):", heading, failures.len())?;
    for failure in failures {
        if failure.path.is_empty() {
            writeln!(w, "  {}", failure.message)?;
        } else {
            writeln!(w, "  {}: {}", failure.path, failure.message)?;
        }
    }
    Ok(())
}

/// Print a scan summary.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_scan<W: Write>(w: &mut W, summary: &ScanSummary) -> Result<(), OutputError> {
    writeln!(w, "Scanned {}", summary.root.display())?;
    writeln!(w, "Store:       {}", summary.store.display())?;
    writeln!(w, "Directories: {}", summary.directories)?;
    writeln!(
        w,
        "Files:       {} added, {} updated, {} unchanged",
        summary.files_added, summary.files_updated, summary.files_unchanged
    )?;
    write_timing(w, &summary.started_at, &summary.finished_at)?;
    write_failures(w, "Skipped files", &summary.file_failures)?;
    write_failures(w, "Failed directories", &summary.unit_failures)?;
    if summary.interrupted {
        writeln!(w, "Interrupted before all directories were scanned")?;
    }
    Ok(())
}

/// Print store statistics.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_stat<W: Write>(w: &mut W, summary: &StatSummary) -> Result<(), OutputError> {
    writeln!(w, "Store:            {}", summary.store.display())?;
    writeln!(w, "Schema version:   {}", summary.schema_version)?;
    writeln!(w, "Total records:    {}", summary.total_records)?;
    writeln!(w, "Merged records:   {}", summary.merged_records)?;
    writeln!(
        w,
        "Duplicate groups: {} ({} redundant file(s))",
        summary.duplicate_groups, summary.redundant_files
    )?;
    Ok(())
}

/// Print a clean summary.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_clean<W: Write>(w: &mut W, summary: &CleanSummary) -> Result<(), OutputError> {
    if summary.no_duplicates {
        writeln!(w, "No duplicates found in {}", summary.store.display())?;
        return Ok(());
    }

    let verb = if summary.dry_run { "Would link" } else { "Linked" };
    let reclaimed = if summary.dry_run {
        "Reclaimable"
    } else {
        "Reclaimed"
    };
    writeln!(w, "Cleaned {}", summary.root.display())?;
    writeln!(w, "Store:          {}", summary.store.display())?;
    writeln!(w, "Groups:         {}", summary.groups)?;
    writeln!(w, "{:<15} {}", format!("{verb}:"), summary.linked)?;
    writeln!(w, "Already linked: {}", summary.already_linked)?;
    if summary.outside_root > 0 {
        writeln!(w, "Outside root:   {}", summary.outside_root)?;
    }
    if summary.symlinks > 0 {
        writeln!(w, "Symlinks:       {}", summary.symlinks)?;
    }
    writeln!(
        w,
        "{:<15} {}",
        format!("{reclaimed}:"),
        ByteSize::b(summary.reclaimed_bytes)
    )?;
    write_timing(w, &summary.started_at, &summary.finished_at)?;
    write_failures(w, "Skipped members", &summary.member_failures)?;
    write_failures(w, "Failed groups", &summary.unit_failures)?;
    if summary.interrupted {
        writeln!(w, "Interrupted before all groups were processed")?;
    }
    Ok(())
}
