//! K-way merge of sorted runs into duplicate groups.
//!
//! # Algorithm
//!
//! 1. Open every run and push its first record onto a min-heap (the merge
//!    frontier), ordered by `(fingerprint, run index)`.
//! 2. Pop the smallest entry. If its fingerprint differs from the group in
//!    progress, close that group (emitting it only if it has 2+ members) and
//!    start a new one. Append the record, then refill the frontier from the
//!    same run.
//! 3. Flush the last group.
//! 4. Close all readers and delete every run, whether or not the merge
//!    succeeded.
//!
//! Every run is sorted, so the heap minimum is always the next record in
//! global order, and a fingerprint is only closed once every run has moved
//! past it. Ties between runs resolve by run index, which fixes the member
//! order inside a group.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::run::{RunId, RunReader, RunStore};
use super::{is_shutdown_requested, SortError};
use crate::duplicates::{DuplicateGroup, GroupSink};
use crate::progress::ProgressCallback;
use crate::record::CertRecord;

/// How many records are merged between shutdown checks and progress updates.
const CHECK_INTERVAL: u64 = 4096;

/// Configuration for [`merge`].
#[derive(Clone, Default)]
pub struct MergeConfig {
    /// Optional shutdown flag for graceful termination.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for MergeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeConfig")
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl MergeConfig {
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

/// Statistics from the merge phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Runs merged
    pub runs: usize,
    /// Records read back from runs
    pub records_merged: u64,
    /// Distinct fingerprints seen
    pub distinct_fingerprints: u64,
    /// Groups written (fingerprints with 2+ records)
    pub duplicate_groups: u64,
    /// Records inside written groups
    pub duplicate_records: u64,
}

/// The next unread record of one run.
///
/// Ordering looks only at `(fingerprint, run index)`, never at the rest of
/// the record, so two entries with the same fingerprint compare by run.
#[derive(Debug)]
pub struct FrontierEntry {
    run: usize,
    record: CertRecord,
}

impl FrontierEntry {
    /// Create an entry for the record at the head of run `run`.
    #[must_use]
    pub fn new(run: usize, record: CertRecord) -> Self {
        Self { run, record }
    }

    /// The sort key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.record.fingerprint()
    }

    /// Index of the run this record came from.
    #[must_use]
    pub fn run(&self) -> usize {
        self.run
    }

    /// Take the record out of the entry.
    #[must_use]
    pub fn into_record(self) -> CertRecord {
        self.record
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key()
            .cmp(other.key())
            .then_with(|| self.run.cmp(&other.run))
    }
}

/// Records collected for the fingerprint currently being merged.
struct PendingGroup {
    fingerprint: String,
    members: Vec<CertRecord>,
}

/// Merge every run in `store` and write duplicate groups to `sink`.
///
/// All runs are deleted before this returns, on success and on failure. If
/// both the merge and the cleanup fail, the merge error is returned.
///
/// # Errors
///
/// - [`SortError::Run`] if a run cannot be opened, read or deleted
/// - [`SortError::CorruptRun`] if a run line does not decode or a run is
///   out of order
/// - [`SortError::Io`] if the sink fails
/// - [`SortError::Interrupted`] on shutdown request
pub fn merge<S: GroupSink + ?Sized>(
    store: &mut RunStore,
    sink: &mut S,
    config: &MergeConfig,
) -> Result<MergeStats, SortError> {
    let ids = store.run_ids();
    let total_records = store.live_records();

    log::info!(
        "Phase 2: Merging {} run(s) holding {} records",
        ids.len(),
        total_records
    );
    if let Some(ref callback) = config.progress_callback {
        callback.on_phase_start("merging", total_records as usize);
    }

    let result = merge_runs(store, &ids, sink, config);
    let cleanup = store.cleanup();

    if let Some(ref callback) = config.progress_callback {
        callback.on_phase_end("merging");
    }

    match (result, cleanup) {
        (Err(e), cleanup) => {
            if let Err(cleanup_err) = cleanup {
                log::warn!("Cleanup after failed merge was incomplete: {}", cleanup_err);
            }
            Err(e)
        }
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err.into()),
        (Ok(stats), Ok(_)) => {
            log::info!(
                "Phase 2: {} duplicate group(s) covering {} records",
                stats.duplicate_groups,
                stats.duplicate_records
            );
            Ok(stats)
        }
    }
}

/// The merge proper. Readers are dropped (files closed) when this returns.
fn merge_runs<S: GroupSink + ?Sized>(
    store: &RunStore,
    ids: &[RunId],
    sink: &mut S,
    config: &MergeConfig,
) -> Result<MergeStats, SortError> {
    let mut readers: Vec<RunReader> = ids
        .iter()
        .map(|&id| store.open_for_read(id))
        .collect::<Result<_, _>>()?;

    let mut stats = MergeStats {
        runs: readers.len(),
        ..MergeStats::default()
    };

    if let Some(ref callback) = config.progress_callback {
        callback.on_message(&format!("{} runs open", readers.len()));
    }

    let mut frontier = BinaryHeap::with_capacity(readers.len());
    for (index, reader) in readers.iter_mut().enumerate() {
        if let Some(record) = reader.next_record()? {
            frontier.push(Reverse(FrontierEntry::new(index, record)));
        }
    }

    let mut pending: Option<PendingGroup> = None;

    while let Some(Reverse(entry)) = frontier.pop() {
        stats.records_merged += 1;
        if stats.records_merged % CHECK_INTERVAL == 0 {
            if is_shutdown_requested(config.shutdown_flag.as_ref()) {
                log::info!("Phase 2: Interrupted by shutdown signal");
                return Err(SortError::Interrupted);
            }
            if let Some(ref callback) = config.progress_callback {
                callback.on_progress(
                    stats.records_merged as usize,
                    &format!("{} groups", stats.duplicate_groups),
                );
            }
        }

        let run = entry.run();
        let reader = &mut readers[run];
        let next = reader.next_record()?;
        if let Some(ref next) = next {
            if next.fingerprint() < entry.key() {
                return Err(SortError::CorruptRun {
                    path: reader.path().to_path_buf(),
                    line: reader.lines_read(),
                    reason: format!(
                        "fingerprint {:?} sorts before preceding {:?}",
                        next.fingerprint(),
                        entry.key()
                    ),
                });
            }
        }

        let record = entry.into_record();
        match pending {
            Some(ref mut group) if group.fingerprint == record.fingerprint() => {
                group.members.push(record);
            }
            _ => {
                if let Some(done) = pending.take() {
                    emit(done, sink, &mut stats)?;
                }
                stats.distinct_fingerprints += 1;
                pending = Some(PendingGroup {
                    fingerprint: record.fingerprint().to_string(),
                    members: vec![record],
                });
            }
        }

        if let Some(next) = next {
            frontier.push(Reverse(FrontierEntry::new(run, next)));
        }
    }

    if let Some(done) = pending.take() {
        emit(done, sink, &mut stats)?;
    }
    sink.flush()
        .map_err(|e| SortError::io("flushing output", e))?;

    Ok(stats)
}

/// Write a finished group if it has duplicates; singletons are dropped.
fn emit<S: GroupSink + ?Sized>(
    group: PendingGroup,
    sink: &mut S,
    stats: &mut MergeStats,
) -> Result<(), SortError> {
    if group.members.len() < 2 {
        return Ok(());
    }

    log::trace!(
        "Duplicate fingerprint {} ({} records)",
        group.fingerprint,
        group.members.len()
    );
    stats.duplicate_groups += 1;
    stats.duplicate_records += group.members.len() as u64;

    let group = DuplicateGroup::from_records(group.fingerprint, group.members);
    sink.write_group(group)
        .map_err(|e| SortError::io("writing output", e))
}
