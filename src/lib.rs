//! ctdupe - Certificate Transparency duplicate finder
//!
//! Finds log records that carry the same leaf certificate, grouped by
//! `data.leaf_cert.fingerprint`, in JSON-lines inputs of any size. The input
//! is cut into memory-bounded chunks that are sorted (optionally in parallel)
//! and spilled to temporary runs, which a k-way merge then streams into
//! duplicate groups.

pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod record;
pub mod signal;
pub mod sort;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::{Cli, Commands, FindArgs};
use crate::config::Config;
use crate::duplicates::{is_stdio, DuplicateFinder, FindSummary};
use crate::error::ExitCode;
use crate::output::JsonSummary;
use crate::progress::Progress;

/// Run the application for parsed command-line arguments.
///
/// # Errors
///
/// Returns an error if the pipeline fails or is interrupted. The caller maps
/// it to an exit code; an interruption downcasts to
/// [`duplicates::FinderError::Interrupted`].
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet, cli.no_color);
    let config = Config::load(cli.config.as_deref());

    match cli.command {
        Commands::Find(ref args) => run_find(args, config, cli.quiet),
    }
}

fn run_find(args: &FindArgs, mut config: Config, quiet: bool) -> Result<ExitCode> {
    config.merge_find_args(args);
    log::debug!("Effective configuration: {:?}", config);

    let handler = signal::install_handler().context("Failed to set up Ctrl+C handling")?;
    let finder_config = config
        .finder_config()
        .with_shutdown_flag(handler.get_flag())
        .with_progress_callback(Arc::new(Progress::new(quiet)));

    let finder = DuplicateFinder::new(finder_config);
    let summary = finder
        .find_duplicates(&args.input, &args.output)
        .with_context(|| format!("Failed to find duplicates in {}", args.input.display()))?;

    let exit_code = ExitCode::for_completed_run(summary.duplicate_groups, summary.lines_skipped);
    report_summary(args, &summary, exit_code)?;
    Ok(exit_code)
}

fn report_summary(args: &FindArgs, summary: &FindSummary, exit_code: ExitCode) -> Result<()> {
    if args.json_summary {
        let json = JsonSummary::from_find_summary(summary, exit_code);
        // Groups own stdout when the output is "-".
        let written = if is_stdio(&args.output) {
            json.write_to(&mut std::io::stderr().lock())
        } else {
            json.write_to(&mut std::io::stdout().lock())
        };
        written.context("Failed to write summary")?;
        return Ok(());
    }

    log::info!(
        "{} records ({}) in {} run(s): {} duplicate group(s), {} redundant record(s), {} skipped line(s)",
        summary.records_read,
        bytesize::ByteSize(summary.input_bytes),
        summary.runs,
        summary.duplicate_groups,
        summary.redundant_records(),
        summary.lines_skipped
    );
    if !is_stdio(&args.output) && summary.has_duplicates() {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "{} duplicate group(s) written to {}",
            summary.duplicate_groups,
            args.output.display()
        );
    }
    Ok(())
}
