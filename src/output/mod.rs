//! Output formatters for duplicate groups and run summaries.
//!
//! # Example
//!
//! ```no_run
//! use ctdupe::duplicates::DuplicateFinder;
//! use ctdupe::output::json::JsonLinesWriter;
//! use std::io::{stdin, stdout, BufWriter};
//!
//! let finder = DuplicateFinder::with_defaults();
//! let mut sink = JsonLinesWriter::new(BufWriter::new(stdout().lock()));
//! let summary = finder.find_duplicates_in(stdin().lock(), &mut sink).unwrap();
//! eprintln!("{} duplicate groups", summary.duplicate_groups);
//! ```

pub mod json;

// Re-export main types
pub use json::{JsonLinesWriter, JsonOutputError, JsonSummary};
