//! Command-line interface definitions for ctdupe.
//!
//! Global options (verbosity, color, error format, config file) apply to
//! every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Find duplicates with the defaults (1 GiB across all cores)
//! ctdupe find ctl_records.jsonlines
//!
//! # Stream from stdin to stdout with 4 workers and 2 GiB in flight
//! zcat records.jsonl.gz | ctdupe -q find - -o - -j 4 --memory 2GiB
//!
//! # Keep going past malformed lines, runs on a scratch disk
//! ctdupe -v find records.jsonl --skip-invalid --temp-dir /scratch
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Default output file for `find`.
pub const DEFAULT_OUTPUT: &str = "duplicates.jsonlines";

/// Find duplicate certificates in Certificate Transparency log records.
///
/// ctdupe groups JSON-lines records by `data.leaf_cert.fingerprint` using an
/// external merge sort, so inputs far larger than memory can be processed.
#[derive(Debug, Parser)]
#[command(name = "ctdupe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file to use instead of the platform default
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Find records that share a certificate fingerprint
    Find(FindArgs),
}

/// Arguments for the find subcommand.
#[derive(Debug, Args)]
pub struct FindArgs {
    /// JSON-lines input file ("-" for stdin)
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output file for duplicate groups ("-" for stdout)
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Total memory for chunks in flight (e.g., 512MiB, 2GiB)
    ///
    /// Split evenly across workers unless --chunk-size is given.
    /// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub memory: Option<u64>,

    /// Input bytes per chunk, overriding --memory
    ///
    /// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub chunk_size: Option<u64>,

    /// Number of chunks sorted in parallel (default: number of CPUs)
    #[arg(short = 'j', long, value_name = "N", value_parser = parse_workers)]
    pub workers: Option<usize>,

    /// Directory for temporary sorted runs (default: system temp dir)
    #[arg(long, value_name = "PATH")]
    pub temp_dir: Option<PathBuf>,

    /// Skip and count lines that are not valid records instead of failing
    #[arg(long, overrides_with = "no_skip_invalid")]
    pub skip_invalid: bool,

    /// Fail on the first line that is not a valid record
    #[arg(long, overrides_with = "skip_invalid")]
    pub no_skip_invalid: bool,

    /// Write the output file in place instead of renaming it on success
    #[arg(long)]
    pub no_atomic: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json_summary: bool,
}

impl FindArgs {
    /// The decode policy requested on the command line, if any.
    #[must_use]
    pub fn skip_invalid_override(&self) -> Option<bool> {
        if self.skip_invalid {
            Some(true)
        } else if self.no_skip_invalid {
            Some(false)
        } else {
            None
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB.
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use ctdupe::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1KB").unwrap(), 1000);
/// assert_eq!(parse_size("1KiB").unwrap(), 1024);
/// assert_eq!(parse_size("1.5GiB").unwrap(), 1_610_612_736);
/// ```
///
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// a negative number, or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    const UNITS: &[(&str, u64)] = &[
        ("", 1),
        ("B", 1),
        ("K", 1_000),
        ("KB", 1_000),
        ("KIB", 1 << 10),
        ("M", 1_000_000),
        ("MB", 1_000_000),
        ("MIB", 1 << 20),
        ("G", 1_000_000_000),
        ("GB", 1_000_000_000),
        ("GIB", 1 << 30),
        ("T", 1_000_000_000_000),
        ("TB", 1_000_000_000_000),
        ("TIB", 1 << 40),
    ];

    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }
    if s.starts_with('-') {
        return Err("Size cannot be negative".to_string());
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let suffix = suffix.trim().to_uppercase();

    let number: f64 = number
        .parse()
        .map_err(|_| format!("Invalid number: '{number}'"))?;
    let multiplier = UNITS
        .iter()
        .find(|(unit, _)| *unit == suffix)
        .map(|(_, m)| *m)
        .ok_or_else(|| format!("Unknown size suffix: '{suffix}'"))?;

    Ok((number * multiplier as f64) as u64)
}

/// Parse a worker count, which must be at least 1.
///
/// # Errors
///
/// Returns an error for zero or a non-numeric value.
pub fn parse_workers(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("Worker count must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("Invalid worker count: '{s}'")),
    }
}
