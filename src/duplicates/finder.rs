//! Duplicate finder: the two-phase external sort pipeline.
//!
//! # Overview
//!
//! 1. **Phase 1 - Chunk sort**: split the input into byte-bounded chunks,
//!    sort each by fingerprint and spill it to a run file
//!    (see [`crate::sort::producer`]).
//! 2. **Phase 2 - Merge**: k-way merge all runs and stream every fingerprint
//!    seen twice or more to the output (see [`crate::sort::merge`]).
//!
//! Runs live in a private session directory that is removed when the
//! pipeline finishes, fails, or is interrupted.
//!
//! # Example
//!
//! ```no_run
//! use ctdupe::duplicates::{DuplicateFinder, FinderConfig};
//! use std::path::Path;
//!
//! let config = FinderConfig::default()
//!     .with_workers(4)
//!     .with_chunk_bytes(256 * 1024 * 1024);
//! let finder = DuplicateFinder::new(config);
//!
//! let summary = finder
//!     .find_duplicates(Path::new("ctl_records.jsonlines"), Path::new("duplicates.jsonlines"))
//!     .unwrap();
//! println!("Found {} duplicate groups", summary.duplicate_groups);
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use crate::output::json::JsonLinesWriter;
use crate::progress::ProgressCallback;
use crate::sort::producer::DEFAULT_CHUNK_BYTES;
use crate::sort::{
    is_shutdown_requested, merge, produce, DecodePolicy, MergeConfig, ProducerConfig, RunStore,
    SortError,
};

use super::GroupSink;

/// Buffer size for reading the input file.
const INPUT_BUFFER_SIZE: usize = 1024 * 1024;

/// Buffer size for writing the output file.
const OUTPUT_BUFFER_SIZE: usize = 256 * 1024;

/// Path that stands for stdin (as input) or stdout (as output).
pub const STDIO_PATH: &str = "-";

/// Configuration for the duplicate finder.
///
/// Controls chunk sizing, parallelism and failure handling of the pipeline.
#[derive(Clone)]
pub struct FinderConfig {
    /// Soft upper bound on raw input bytes per chunk.
    pub chunk_bytes: u64,
    /// Number of concurrent chunk-sort workers (1 = sequential).
    pub workers: usize,
    /// What to do with input lines that do not decode.
    pub decode_policy: DecodePolicy,
    /// Directory under which the session directory for runs is created.
    /// `None` uses the system temp directory.
    pub temp_dir: Option<PathBuf>,
    /// Write output files through a temp file that is renamed on success.
    pub atomic_output: bool,
    /// Optional shutdown flag for graceful termination.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback for reporting.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for FinderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinderConfig")
            .field("chunk_bytes", &self.chunk_bytes)
            .field("workers", &self.workers)
            .field("decode_policy", &self.decode_policy)
            .field("temp_dir", &self.temp_dir)
            .field("atomic_output", &self.atomic_output)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            workers: 1,
            decode_policy: DecodePolicy::Abort,
            temp_dir: None,
            atomic_output: true,
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl FinderConfig {
    /// Set the per-chunk byte budget.
    #[must_use]
    pub fn with_chunk_bytes(mut self, bytes: u64) -> Self {
        self.chunk_bytes = bytes.max(1);
        self
    }

    /// Set the number of workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the decode policy.
    #[must_use]
    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    /// Set the parent directory for run files.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    /// Enable or disable atomic output.
    #[must_use]
    pub fn with_atomic_output(mut self, enabled: bool) -> Self {
        self.atomic_output = enabled;
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn producer_config(&self, input_len: Option<u64>) -> ProducerConfig {
        let mut config = ProducerConfig::default()
            .with_chunk_bytes(self.chunk_bytes)
            .with_workers(self.workers)
            .with_decode_policy(self.decode_policy);
        if let Some(len) = input_len {
            config = config.with_input_len(len);
        }
        if let Some(ref flag) = self.shutdown_flag {
            config = config.with_shutdown_flag(flag.clone());
        }
        if let Some(ref callback) = self.progress_callback {
            config = config.with_progress_callback(callback.clone());
        }
        config
    }

    fn merge_config(&self) -> MergeConfig {
        let mut config = MergeConfig::default();
        if let Some(ref flag) = self.shutdown_flag {
            config = config.with_shutdown_flag(flag.clone());
        }
        if let Some(ref callback) = self.progress_callback {
            config = config.with_progress_callback(callback.clone());
        }
        config
    }
}

/// Summary statistics from one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindSummary {
    /// Records decoded and written to runs
    pub records_read: u64,
    /// Input lines skipped under [`DecodePolicy::Skip`]
    pub lines_skipped: u64,
    /// Raw input bytes consumed
    pub input_bytes: u64,
    /// Chunks read from the input
    pub chunks: usize,
    /// Sorted runs written
    pub runs: usize,
    /// Records read back during the merge
    pub records_merged: u64,
    /// Distinct fingerprints seen
    pub distinct_fingerprints: u64,
    /// Duplicate groups written
    pub duplicate_groups: u64,
    /// Records inside duplicate groups
    pub duplicate_records: u64,
    /// Duration of Phase 1
    pub sort_duration: Duration,
    /// Duration of Phase 2
    pub merge_duration: Duration,
    /// Duration of the whole run
    pub total_duration: Duration,
}

impl FindSummary {
    /// Check if any duplicate group was written.
    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        self.duplicate_groups > 0
    }

    /// Records that duplicate an earlier record with the same fingerprint.
    #[must_use]
    pub fn redundant_records(&self) -> u64 {
        self.duplicate_records - self.duplicate_groups
    }
}

/// Errors that can occur during duplicate finding.
#[derive(thiserror::Error, Debug)]
pub enum FinderError {
    /// The run was interrupted by user (Ctrl+C or shutdown signal).
    #[error("Interrupted by user")]
    Interrupted,

    /// The input file does not exist.
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),

    /// An I/O error occurred on the input or output file.
    #[error("I/O error for {path}: {source}")]
    IoWithPath {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The sort engine failed.
    #[error(transparent)]
    Sort(SortError),
}

impl From<SortError> for FinderError {
    fn from(err: SortError) -> Self {
        match err {
            SortError::Interrupted => Self::Interrupted,
            other => Self::Sort(other),
        }
    }
}

impl FinderError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::IoWithPath {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Duplicate finder that runs the external sort pipeline.
///
/// # Example
///
/// ```
/// use ctdupe::duplicates::{DuplicateFinder, DuplicateGroup};
///
/// let input = concat!(
///     r#"{"data":{"leaf_cert":{"fingerprint":"F2"}},"n":1}"#, "\n",
///     r#"{"data":{"leaf_cert":{"fingerprint":"F1"}},"n":2}"#, "\n",
///     r#"{"data":{"leaf_cert":{"fingerprint":"F2"}},"n":3}"#, "\n",
/// );
///
/// let mut groups: Vec<DuplicateGroup> = Vec::new();
/// let summary = DuplicateFinder::with_defaults()
///     .find_duplicates_in(input.as_bytes(), &mut groups)
///     .unwrap();
///
/// assert_eq!(summary.records_read, 3);
/// assert_eq!(groups.len(), 1);
/// assert_eq!(groups[0].fingerprint, "F2");
/// ```
#[derive(Debug, Clone, Default)]
pub struct DuplicateFinder {
    config: FinderConfig,
}

impl DuplicateFinder {
    /// Create a new duplicate finder with the given configuration.
    #[must_use]
    pub fn new(config: FinderConfig) -> Self {
        Self { config }
    }

    /// Create a new duplicate finder with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(FinderConfig::default())
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Find duplicates in `input` and write them to `output`.
    ///
    /// `-` stands for stdin as input and stdout as output. With
    /// [`FinderConfig::atomic_output`], an output file only appears once the
    /// run has succeeded; a failed run leaves any previous file untouched.
    ///
    /// # Errors
    ///
    /// - [`FinderError::InputNotFound`] if the input file does not exist
    /// - [`FinderError::IoWithPath`] if the input or output cannot be opened
    ///   or the output cannot be committed
    /// - [`FinderError::Sort`] if the pipeline fails
    /// - [`FinderError::Interrupted`] on shutdown request
    pub fn find_duplicates(&self, input: &Path, output: &Path) -> Result<FindSummary, FinderError> {
        if is_stdio(input) {
            log::info!("Reading records from stdin");
            return self.find_into(io::stdin().lock(), None, output);
        }

        if !input.exists() {
            return Err(FinderError::InputNotFound(input.to_path_buf()));
        }
        let file = File::open(input).map_err(|e| FinderError::io(input, e))?;
        let input_len = file.metadata().ok().map(|m| m.len());
        log::info!(
            "Reading records from {}{}",
            input.display(),
            input_len
                .map(|len| format!(" ({})", bytesize::ByteSize(len)))
                .unwrap_or_default()
        );

        let reader = BufReader::with_capacity(INPUT_BUFFER_SIZE, file);
        self.find_into(reader, input_len, output)
    }

    /// Find duplicates in a reader and hand every group to `sink`.
    ///
    /// # Errors
    ///
    /// - [`FinderError::Sort`] if the pipeline or the sink fails
    /// - [`FinderError::Interrupted`] on shutdown request
    pub fn find_duplicates_in<R, S>(&self, input: R, sink: &mut S) -> Result<FindSummary, FinderError>
    where
        R: BufRead,
        S: GroupSink + ?Sized,
    {
        self.run_pipeline(input, None, sink)
    }

    fn find_into<R: BufRead>(
        &self,
        input: R,
        input_len: Option<u64>,
        output: &Path,
    ) -> Result<FindSummary, FinderError> {
        if is_stdio(output) {
            let stdout = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, io::stdout().lock());
            let mut sink = JsonLinesWriter::new(stdout);
            return self.run_pipeline(input, input_len, &mut sink);
        }

        if !self.config.atomic_output {
            let file = File::create(output).map_err(|e| FinderError::io(output, e))?;
            let mut sink = JsonLinesWriter::new(BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, file));
            let summary = self.run_pipeline(input, input_len, &mut sink)?;
            log::info!("Wrote {}", output.display());
            return Ok(summary);
        }

        let dir = output_dir(output);
        let partial = create_partial(dir, output).map_err(|e| FinderError::io(dir, e))?;
        log::debug!("Writing to {}", partial.path().display());

        let mut sink =
            JsonLinesWriter::new(BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, partial));
        let summary = self.run_pipeline(input, input_len, &mut sink)?;

        let partial = sink
            .into_inner()
            .into_inner()
            .map_err(|e| FinderError::io(output, e.into_error()))?;
        partial
            .persist(output)
            .map_err(|e| FinderError::io(output, e.error))?;
        log::info!("Wrote {}", output.display());

        Ok(summary)
    }

    fn run_pipeline<R, S>(
        &self,
        input: R,
        input_len: Option<u64>,
        sink: &mut S,
    ) -> Result<FindSummary, FinderError>
    where
        R: BufRead,
        S: GroupSink + ?Sized,
    {
        let start_time = Instant::now();

        if is_shutdown_requested(self.config.shutdown_flag.as_ref()) {
            return Err(FinderError::Interrupted);
        }

        let mut store =
            RunStore::new(self.config.temp_dir.as_deref()).map_err(SortError::from)?;

        let produced = produce(input, &mut store, &self.config.producer_config(input_len))?;
        let sort_duration = start_time.elapsed();

        let merge_start = Instant::now();
        let merged = merge(&mut store, sink, &self.config.merge_config())?;
        let merge_duration = merge_start.elapsed();

        let summary = FindSummary {
            records_read: produced.records,
            lines_skipped: produced.skipped,
            input_bytes: produced.input_bytes,
            chunks: produced.chunks,
            runs: produced.runs,
            records_merged: merged.records_merged,
            distinct_fingerprints: merged.distinct_fingerprints,
            duplicate_groups: merged.duplicate_groups,
            duplicate_records: merged.duplicate_records,
            sort_duration,
            merge_duration,
            total_duration: start_time.elapsed(),
        };

        log::info!(
            "Found {} duplicate group(s) among {} records ({} distinct fingerprints) in {:.2?}",
            summary.duplicate_groups,
            summary.records_read,
            summary.distinct_fingerprints,
            summary.total_duration
        );
        if summary.lines_skipped > 0 {
            log::warn!("{} undecodable line(s) were skipped", summary.lines_skipped);
        }

        Ok(summary)
    }
}

/// Check if a path means stdin/stdout.
#[must_use]
pub fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == STDIO_PATH
}

/// Create the temp file an atomic run writes into.
///
/// It is committed by rename, so it gets the mode the output would have had:
/// that of the file it replaces, or 0o666 less the umask for a new file, as
/// with `File::create`.
fn create_partial(dir: &Path, output: &Path) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".ctdupe-").suffix(".partial");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }

    let partial = builder.tempfile_in(dir)?;
    if let Ok(existing) = std::fs::metadata(output) {
        partial.as_file().set_permissions(existing.permissions())?;
    }
    Ok(partial)
}

/// Directory an output file will be created in.
fn output_dir(output: &Path) -> &Path {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
