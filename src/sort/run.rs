//! Temporary run files and their lifecycle.
//!
//! [`RunStore`] is the single owner of every run produced during a session.
//! Runs live in a private session directory and are deleted exactly once:
//! explicitly through [`RunStore::delete`] / [`RunStore::cleanup`], or, on
//! any early exit, when the store is dropped. A [`RunWriter`] that is dropped
//! before [`RunWriter::finish`] removes its own file.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tempfile::{TempDir, TempPath};

use super::SortError;
use crate::record::CertRecord;

/// Buffer size for writing runs.
const RUN_WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Buffer size for reading runs during merge.
const RUN_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Identifier of a registered run, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(usize);

impl RunId {
    /// Position of this run among all runs registered in its store.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run #{}", self.0)
    }
}

/// Errors from creating, reading or deleting run files.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    /// The session directory could not be created.
    #[error("failed to create temporary directory in {dir}: {source}")]
    SessionDir {
        /// Parent directory
        dir: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A run file could not be created.
    #[error("failed to create run file in {dir}: {source}")]
    Create {
        /// Session directory
        dir: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Writing a run file failed.
    #[error("failed to write run {path}: {source}")]
    Write {
        /// Path of the run file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Opening or reading a run file failed.
    #[error("failed to read run {path}: {source}")]
    Read {
        /// Path of the run file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Deleting a run file failed.
    #[error("failed to delete run {path}: {source}")]
    Delete {
        /// Path of the run file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The id was never issued by this store.
    #[error("unknown {0}")]
    UnknownRun(RunId),

    /// The run has already been deleted.
    #[error("{0} was already deleted")]
    AlreadyDeleted(RunId),
}

/// A finished, sorted run on disk.
///
/// Dropping a `Run` deletes its file.
#[derive(Debug)]
pub struct Run {
    path: TempPath,
    records: u64,
    bytes: u64,
}

impl Run {
    /// Path of the run file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the run.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Size of the run file in bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Check if the run holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }
}

/// Writes records into a freshly created run file.
pub struct RunWriter {
    writer: BufWriter<File>,
    path: TempPath,
    records: u64,
    bytes: u64,
}

impl RunWriter {
    /// Path of the file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Write`] if the write fails (including a full disk).
    pub fn write_record(&mut self, record: &CertRecord) -> Result<(), RunError> {
        record
            .write_line(&mut self.writer)
            .map_err(|source| RunError::Write {
                path: self.path.to_path_buf(),
                source,
            })?;
        self.records += 1;
        self.bytes += record.encode().len() as u64 + 1;
        Ok(())
    }

    /// Flush and close the file, handing it over as a [`Run`].
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Write`] if the final flush fails. The file is
    /// removed in that case.
    pub fn finish(self) -> Result<Run, RunError> {
        let Self {
            writer,
            path,
            records,
            bytes,
        } = self;

        let file = writer.into_inner().map_err(|e| RunError::Write {
            path: path.to_path_buf(),
            source: e.into_error(),
        })?;
        drop(file);

        Ok(Run {
            path,
            records,
            bytes,
        })
    }
}

/// Sequential reader over one run, used by the merge.
pub struct RunReader {
    id: RunId,
    path: PathBuf,
    reader: BufReader<File>,
    line: u64,
    buf: String,
}

impl RunReader {
    /// The run being read.
    #[must_use]
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Path of the run file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines read so far.
    #[must_use]
    pub fn lines_read(&self) -> u64 {
        self.line
    }

    /// Read and decode the next record, or `None` at end of run.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Read`] on I/O failure and
    /// [`SortError::CorruptRun`] if a line does not decode.
    pub fn next_record(&mut self) -> Result<Option<CertRecord>, SortError> {
        self.buf.clear();
        let n = self
            .reader
            .read_line(&mut self.buf)
            .map_err(|source| RunError::Read {
                path: self.path.clone(),
                source,
            })?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;

        CertRecord::decode(&self.buf)
            .map(Some)
            .map_err(|e| SortError::CorruptRun {
                path: self.path.clone(),
                line: self.line,
                reason: e.to_string(),
            })
    }
}

/// Owner of all runs created during one pipeline session.
///
/// # Example
///
/// ```
/// use ctdupe::record::CertRecord;
/// use ctdupe::sort::RunStore;
///
/// let mut store = RunStore::new(None).unwrap();
///
/// let mut writer = store.create_run().unwrap();
/// let record = CertRecord::decode(r#"{"data":{"leaf_cert":{"fingerprint":"F"}}}"#).unwrap();
/// writer.write_record(&record).unwrap();
/// let id = store.register(writer.finish().unwrap());
///
/// assert_eq!(store.live_runs(), 1);
/// assert!(store.delete(id).unwrap());
/// assert!(!store.delete(id).unwrap()); // second delete is a no-op
/// ```
#[derive(Debug)]
pub struct RunStore {
    dir: TempDir,
    runs: Vec<Option<Run>>,
}

impl RunStore {
    /// Create a store with a private session directory.
    ///
    /// The directory is created under `temp_root` when given (creating
    /// `temp_root` itself if needed), or under the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::SessionDir`] if the directory cannot be created.
    pub fn new(temp_root: Option<&Path>) -> Result<Self, RunError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ctdupe-");

        let dir = match temp_root {
            Some(root) => std::fs::create_dir_all(root)
                .and_then(|()| builder.tempdir_in(root))
                .map_err(|source| RunError::SessionDir {
                    dir: root.to_path_buf(),
                    source,
                })?,
            None => builder.tempdir().map_err(|source| RunError::SessionDir {
                dir: std::env::temp_dir(),
                source,
            })?,
        };

        log::debug!("Run directory: {}", dir.path().display());
        Ok(Self {
            dir,
            runs: Vec::new(),
        })
    }

    /// The session directory holding the run files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Create a new run file for writing.
    ///
    /// Takes `&self` so workers can create runs concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Create`] if the file cannot be created.
    pub fn create_run(&self) -> Result<RunWriter, RunError> {
        let file = tempfile::Builder::new()
            .prefix("run-")
            .suffix(".jsonl")
            .tempfile_in(self.dir.path())
            .map_err(|source| RunError::Create {
                dir: self.dir.path().to_path_buf(),
                source,
            })?;
        let (file, path) = file.into_parts();
        log::trace!("Created run file {}", path.display());

        Ok(RunWriter {
            writer: BufWriter::with_capacity(RUN_WRITE_BUFFER_SIZE, file),
            path,
            records: 0,
            bytes: 0,
        })
    }

    /// Take ownership of a finished run.
    pub fn register(&mut self, run: Run) -> RunId {
        let id = RunId(self.runs.len());
        log::debug!(
            "Registered {} ({} records, {} bytes)",
            id,
            run.records(),
            run.bytes()
        );
        self.runs.push(Some(run));
        id
    }

    /// Look up a live run.
    #[must_use]
    pub fn get(&self, id: RunId) -> Option<&Run> {
        self.runs.get(id.0).and_then(Option::as_ref)
    }

    /// Ids of all runs not yet deleted, in registration order.
    #[must_use]
    pub fn run_ids(&self) -> Vec<RunId> {
        self.runs
            .iter()
            .enumerate()
            .filter(|(_, run)| run.is_some())
            .map(|(i, _)| RunId(i))
            .collect()
    }

    /// Number of runs ever registered.
    #[must_use]
    pub fn registered_runs(&self) -> usize {
        self.runs.len()
    }

    /// Number of runs not yet deleted.
    #[must_use]
    pub fn live_runs(&self) -> usize {
        self.runs.iter().filter(|r| r.is_some()).count()
    }

    /// Total records across live runs.
    #[must_use]
    pub fn live_records(&self) -> u64 {
        self.runs.iter().flatten().map(Run::records).sum()
    }

    /// Open a live run for sequential reading.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::UnknownRun`] or [`RunError::AlreadyDeleted`] for
    /// a bad id, and [`RunError::Read`] if the file cannot be opened.
    pub fn open_for_read(&self, id: RunId) -> Result<RunReader, RunError> {
        let run = match self.runs.get(id.0) {
            None => return Err(RunError::UnknownRun(id)),
            Some(None) => return Err(RunError::AlreadyDeleted(id)),
            Some(Some(run)) => run,
        };

        let path = run.path().to_path_buf();
        let file = File::open(&path).map_err(|source| RunError::Read {
            path: path.clone(),
            source,
        })?;

        Ok(RunReader {
            id,
            path,
            reader: BufReader::with_capacity(RUN_READ_BUFFER_SIZE, file),
            line: 0,
            buf: String::new(),
        })
    }

    /// Delete one run.
    ///
    /// Returns `Ok(false)` if the run was already deleted. Readers of the run
    /// should be dropped first; on platforms that refuse to delete open files
    /// the error is reported, never ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::UnknownRun`] for an id this store never issued and
    /// [`RunError::Delete`] if the file cannot be removed.
    pub fn delete(&mut self, id: RunId) -> Result<bool, RunError> {
        let slot = self.runs.get_mut(id.0).ok_or(RunError::UnknownRun(id))?;
        let Some(run) = slot.take() else {
            return Ok(false);
        };

        let path = run.path().to_path_buf();
        run.path.close().map_err(|source| RunError::Delete {
            path: path.clone(),
            source,
        })?;
        log::trace!("Deleted {} ({})", id, path.display());
        Ok(true)
    }

    /// Delete every remaining run.
    ///
    /// Keeps going past failures and reports the first one.
    ///
    /// # Errors
    ///
    /// Returns the first [`RunError::Delete`] encountered.
    pub fn cleanup(&mut self) -> Result<usize, RunError> {
        let mut deleted = 0;
        let mut first_error = None;

        for id in self.run_ids() {
            match self.delete(id) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    log::warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if deleted > 0 {
            log::debug!("Cleaned up {} run file(s)", deleted);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }
}

impl Drop for RunStore {
    fn drop(&mut self) {
        if self.live_runs() > 0 {
            log::debug!(
                "Removing {} leftover run file(s) from {}",
                self.live_runs(),
                self.dir.path().display()
            );
            let _ = self.cleanup();
        }
    }
}
