//! External sort engine.
//!
//! This module provides the pieces of the bounded-memory pipeline:
//! - [`chunk`]: splitting the input into byte-bounded chunks of lines
//! - [`sorter`]: decoding, sorting and spilling one chunk as a run
//! - [`producer`]: driving the sorter sequentially or on a worker pool
//! - [`merge`]: k-way merge of all runs into duplicate groups
//! - [`run`]: ownership and cleanup of temporary run files
//!
//! # Example
//!
//! ```no_run
//! use ctdupe::sort::{merge, produce, MergeConfig, ProducerConfig, RunStore};
//! use ctdupe::duplicates::DuplicateGroup;
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! let input = BufReader::new(File::open("ctl_records.jsonlines").unwrap());
//! let mut store = RunStore::new(None).unwrap();
//!
//! let config = ProducerConfig::default().with_workers(4);
//! produce(input, &mut store, &config).unwrap();
//!
//! let mut groups: Vec<DuplicateGroup> = Vec::new();
//! let stats = merge(&mut store, &mut groups, &MergeConfig::default()).unwrap();
//! println!("{} duplicate groups", stats.duplicate_groups);
//! ```

pub mod chunk;
pub mod merge;
pub mod producer;
pub mod run;
pub mod sorter;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::record::DecodeError;

// Re-export main types
pub use chunk::{Chunk, ChunkReader};
pub use merge::{merge, FrontierEntry, MergeConfig, MergeStats};
pub use producer::{produce, ProduceStats, ProducerConfig};
pub use run::{Run, RunError, RunId, RunReader, RunStore, RunWriter};
pub use sorter::{sort_chunk, SortedChunk};

/// What to do with an input line that does not decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Fail the whole pipeline on the first bad line.
    #[default]
    Abort,
    /// Log the line, count it, and leave it out of the output.
    Skip,
}

/// Errors raised by the sort engine.
#[derive(thiserror::Error, Debug)]
pub enum SortError {
    /// An input line could not be decoded.
    #[error("line {line}: {source}")]
    Decode {
        /// 1-based input line number
        line: u64,
        /// The underlying decode failure
        #[source]
        source: DecodeError,
    },

    /// An I/O error on the input, a run, or the output.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What the engine was doing
        context: &'static str,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A run file could not be created, read or deleted.
    #[error(transparent)]
    Run(#[from] RunError),

    /// A run file does not hold what the sorter wrote.
    #[error("corrupt run {path} at line {line}: {reason}")]
    CorruptRun {
        /// Path of the run file
        path: PathBuf,
        /// 1-based line within the run
        line: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Shutdown was requested while the engine was running.
    #[error("interrupted")]
    Interrupted,
}

impl SortError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Shorthand for checking an optional shutdown flag.
pub(crate) fn is_shutdown_requested(
    flag: Option<&std::sync::Arc<std::sync::atomic::AtomicBool>>,
) -> bool {
    flag.is_some_and(|f| f.load(std::sync::atomic::Ordering::SeqCst))
}
