//! JSON-lines output for duplicate groups and JSON run summaries.
//!
//! # Output Schema
//!
//! One group per line, certificates reproduced exactly as read:
//!
//! ```json
//! {"fingerprint":"AB:CD:...","certificates":[{"data":{...}},{"data":{...}}]}
//! ```
//!
//! The `--json-summary` report is a single object:
//!
//! ```json
//! {
//!   "records_read": 1000,
//!   "lines_skipped": 0,
//!   "runs": 4,
//!   "duplicate_groups": 12,
//!   "duplicate_records": 25,
//!   "sort_duration_ms": 812,
//!   "merge_duration_ms": 133,
//!   "exit_code": 0,
//!   "exit_code_name": "CT000"
//! }
//! ```
//!
//! # Example
//!
//! ```
//! use ctdupe::duplicates::{DuplicateGroup, GroupSink};
//! use ctdupe::output::json::JsonLinesWriter;
//!
//! let mut writer = JsonLinesWriter::new(Vec::new());
//! writer.write_group(DuplicateGroup::new("AB".to_string(), Vec::new())).unwrap();
//!
//! let text = String::from_utf8(writer.into_inner()).unwrap();
//! assert_eq!(text, "{\"fingerprint\":\"AB\",\"certificates\":[]}\n");
//! ```

use std::io::{self, Write};

use serde::Serialize;

use crate::duplicates::{DuplicateGroup, FindSummary, GroupSink};
use crate::error::ExitCode;

/// Streams duplicate groups to a writer, one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesWriter<W: Write> {
    writer: W,
    groups_written: u64,
}

impl<W: Write> JsonLinesWriter<W> {
    /// Wrap a writer. Callers should pass a buffered writer for files.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            groups_written: 0,
        }
    }

    /// Number of groups written so far.
    #[must_use]
    pub fn groups_written(&self) -> u64 {
        self.groups_written
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> GroupSink for JsonLinesWriter<W> {
    fn write_group(&mut self, group: DuplicateGroup) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, &group)?;
        self.writer.write_all(b"\n")?;
        self.groups_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Run summary in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    /// Records decoded and written to runs
    pub records_read: u64,
    /// Input lines skipped as undecodable
    pub lines_skipped: u64,
    /// Raw input bytes consumed
    pub input_bytes: u64,
    /// Chunks read from the input
    pub chunks: usize,
    /// Sorted runs written to disk
    pub runs: usize,
    /// Records read back during the merge
    pub records_merged: u64,
    /// Distinct fingerprints seen
    pub distinct_fingerprints: u64,
    /// Duplicate groups written
    pub duplicate_groups: u64,
    /// Records inside duplicate groups
    pub duplicate_records: u64,
    /// Duration of the chunk sort phase in milliseconds
    pub sort_duration_ms: u64,
    /// Duration of the merge phase in milliseconds
    pub merge_duration_ms: u64,
    /// Duration of the whole run in milliseconds
    pub total_duration_ms: u64,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "CT000")
    pub exit_code_name: String,
}

impl JsonSummary {
    /// Create a JSON summary from a run summary and an exit code.
    #[must_use]
    pub fn from_find_summary(summary: &FindSummary, exit_code: ExitCode) -> Self {
        Self {
            records_read: summary.records_read,
            lines_skipped: summary.lines_skipped,
            input_bytes: summary.input_bytes,
            chunks: summary.chunks,
            runs: summary.runs,
            records_merged: summary.records_merged,
            distinct_fingerprints: summary.distinct_fingerprints,
            duplicate_groups: summary.duplicate_groups,
            duplicate_records: summary.duplicate_records,
            sort_duration_ms: summary.sort_duration.as_millis() as u64,
            merge_duration_ms: summary.merge_duration.as_millis() as u64,
            total_duration_ms: summary.total_duration.as_millis() as u64,
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix().to_string(),
        }
    }

    /// Write the summary as pretty-printed JSON followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), JsonOutputError> {
        let json = serde_json::to_string_pretty(self)?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Errors that can occur during JSON output.
#[derive(thiserror::Error, Debug)]
pub enum JsonOutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error during JSON generation: {0}")]
    Io(#[from] std::io::Error),
}
