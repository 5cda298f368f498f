//! Splitting the input into chunks and sorting them into runs.
//!
//! # Modes
//!
//! - **Sequential** (`workers == 1`): read a chunk, sort it, repeat.
//! - **Parallel** (`workers > 1`): the calling thread reads up to `workers`
//!   chunks per round, a rayon pool sorts them concurrently, and the round
//!   ends when every worker is done. Rounds never overlap, so at most
//!   `workers` chunks are in memory at once.
//!
//! In both modes runs are registered in input order, so the run sequence is
//! the same whatever the worker count.

use std::io::BufRead;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rayon::prelude::*;

use super::chunk::{Chunk, ChunkReader};
use super::run::RunStore;
use super::sorter::{sort_chunk, SortedChunk};
use super::{is_shutdown_requested, DecodePolicy, SortError};
use crate::progress::ProgressCallback;

/// Default per-chunk byte budget (1 GiB).
pub const DEFAULT_CHUNK_BYTES: u64 = 1 << 30;

/// Configuration for [`produce`].
#[derive(Clone)]
pub struct ProducerConfig {
    /// Soft upper bound on raw input bytes per chunk.
    pub chunk_bytes: u64,
    /// Number of concurrent chunk-sort workers (1 = sequential).
    pub workers: usize,
    /// What to do with lines that do not decode.
    pub decode_policy: DecodePolicy,
    /// Size of the input in bytes, if known, for progress reporting.
    pub input_len: Option<u64>,
    /// Optional shutdown flag for graceful termination.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for ProducerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConfig")
            .field("chunk_bytes", &self.chunk_bytes)
            .field("workers", &self.workers)
            .field("decode_policy", &self.decode_policy)
            .field("input_len", &self.input_len)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            workers: 1,
            decode_policy: DecodePolicy::Abort,
            input_len: None,
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl ProducerConfig {
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

    /// Set the known input size.
    #[must_use]
    pub fn with_input_len(mut self, len: u64) -> Self {
        self.input_len = Some(len);
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
}

/// Statistics from the chunking phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProduceStats {
    /// Chunks read from the input
    pub chunks: usize,
    /// Runs registered with the store
    pub runs: usize,
    /// Records written to runs
    pub records: u64,
    /// Lines skipped under [`DecodePolicy::Skip`]
    pub skipped: u64,
    /// Raw input bytes consumed
    pub input_bytes: u64,
    /// Parallel rounds executed (0 in sequential mode)
    pub rounds: usize,
}

impl ProduceStats {
    fn absorb(&mut self, sorted: SortedChunk, store: &mut RunStore) {
        self.chunks += 1;
        self.runs += 1;
        self.records += sorted.run.records();
        self.skipped += sorted.skipped;
        self.input_bytes += sorted.input_bytes;
        store.register(sorted.run);
    }
}

/// Turn the whole input into sorted runs registered in `store`.
///
/// # Errors
///
/// Any decode, I/O or run failure fails the whole call, as does a shutdown
/// request. Before the error is returned every run in `store` is deleted,
/// including runs other workers finished in the same round.
pub fn produce<R: BufRead>(
    input: R,
    store: &mut RunStore,
    config: &ProducerConfig,
) -> Result<ProduceStats, SortError> {
    let mut reader = ChunkReader::new(input, config.chunk_bytes);
    let mut stats = ProduceStats::default();

    log::info!(
        "Phase 1: Sorting chunks of up to {} with {} worker(s)",
        bytesize::ByteSize(reader.budget()),
        config.workers
    );

    if let Some(ref callback) = config.progress_callback {
        callback.on_phase_start("chunking", config.input_len.unwrap_or(0) as usize);
    }

    let result = if config.workers <= 1 {
        produce_sequential(&mut reader, store, config, &mut stats)
    } else {
        produce_parallel(&mut reader, store, config, &mut stats)
    };

    if let Some(ref callback) = config.progress_callback {
        callback.on_phase_end("chunking");
    }

    if let Err(e) = result {
        log::debug!("Chunking failed, removing {} run(s)", store.live_runs());
        if let Err(cleanup_err) = store.cleanup() {
            log::warn!("Cleanup after failure was incomplete: {}", cleanup_err);
        }
        return Err(e);
    }

    log::info!(
        "Phase 1: {} records in {} run(s){}",
        stats.records,
        stats.runs,
        if stats.skipped > 0 {
            format!(", {} line(s) skipped", stats.skipped)
        } else {
            String::new()
        }
    );
    Ok(stats)
}

fn produce_sequential<R: BufRead>(
    reader: &mut ChunkReader<R>,
    store: &mut RunStore,
    config: &ProducerConfig,
    stats: &mut ProduceStats,
) -> Result<(), SortError> {
    loop {
        if is_shutdown_requested(config.shutdown_flag.as_ref()) {
            log::info!("Phase 1: Interrupted by shutdown signal");
            return Err(SortError::Interrupted);
        }

        let Some(chunk) = reader.next_chunk()? else {
            return Ok(());
        };
        let sorted = sort_chunk(chunk, store, config.decode_policy)?;
        stats.absorb(sorted, store);
        report_progress(config, reader.bytes_read(), stats);
    }
}

fn produce_parallel<R: BufRead>(
    reader: &mut ChunkReader<R>,
    store: &mut RunStore,
    config: &ProducerConfig,
    stats: &mut ProduceStats,
) -> Result<(), SortError> {
    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .thread_name(|i| format!("ctdupe-sort-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            log::warn!(
                "Failed to create sort pool ({}), using global pool with {} threads",
                e,
                rayon::current_num_threads()
            );
            None
        }
    };

    loop {
        if is_shutdown_requested(config.shutdown_flag.as_ref()) {
            log::info!("Phase 1: Interrupted by shutdown signal");
            return Err(SortError::Interrupted);
        }

        let round = reader.next_round(config.workers)?;
        if round.is_empty() {
            return Ok(());
        }
        log::debug!(
            "Round {}: dispatching {} chunk(s)",
            stats.rounds,
            round.len()
        );

        let shared: &RunStore = store;
        let policy = config.decode_policy;
        let sort_round = |round: Vec<Chunk>| -> Vec<Result<SortedChunk, SortError>> {
            round
                .into_par_iter()
                .map(|chunk| sort_chunk(chunk, shared, policy))
                .collect()
        };
        let results = match pool {
            Some(ref pool) => pool.install(|| sort_round(round)),
            None => sort_round(round),
        };

        // Register every finished run before surfacing a failure, so the
        // store owns (and deletes) all of them.
        let mut first_error = None;
        for result in results {
            match result {
                Ok(sorted) => stats.absorb(sorted, store),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        stats.rounds += 1;
        report_progress(config, reader.bytes_read(), stats);
    }
}

fn report_progress(config: &ProducerConfig, bytes_read: u64, stats: &ProduceStats) {
    if let Some(ref callback) = config.progress_callback {
        callback.on_progress(bytes_read as usize, &format!("{} runs", stats.runs));
    }
}
