use ctdupe::duplicates::{DuplicateFinder, DuplicateGroup, FinderConfig, FinderError, GroupSink};
use ctdupe::progress::ProgressCallback;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn input(n: usize, distinct: usize) -> String {
    (0..n)
        .map(|i| {
            format!(
                "{{\"data\":{{\"leaf_cert\":{{\"fingerprint\":\"fp{}\"}}}},\"i\":{}}}\n",
                i % distinct,
                i
            )
        })
        .collect()
}

fn entries(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[test]
fn test_runs_removed_after_success() {
    let scratch = tempdir().unwrap();
    let config = FinderConfig::default()
        .with_temp_dir(scratch.path().to_path_buf())
        .with_chunk_bytes(256)
        .with_workers(4);

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    let summary = DuplicateFinder::new(config)
        .find_duplicates_in(input(100, 10).as_bytes(), &mut groups)
        .unwrap();

    assert!(summary.runs > 4);
    assert_eq!(groups.len(), 10);
    assert_eq!(entries(scratch.path()), 0);
}

#[test]
fn test_runs_removed_after_decode_failure() {
    let scratch = tempdir().unwrap();
    let mut text = input(80, 8);
    text.push_str("{\"truncated\":\n");
    text.push_str(&input(10, 8));

    for workers in [1, 4] {
        let config = FinderConfig::default()
            .with_temp_dir(scratch.path().to_path_buf())
            .with_chunk_bytes(128)
            .with_workers(workers);

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        let result = DuplicateFinder::new(config).find_duplicates_in(text.as_bytes(), &mut groups);

        assert!(matches!(result, Err(FinderError::Sort(_))));
        assert!(groups.is_empty());
        assert_eq!(entries(scratch.path()), 0, "workers = {}", workers);
    }
}

struct BrokenSink;

impl GroupSink for BrokenSink {
    fn write_group(&mut self, _group: DuplicateGroup) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader went away"))
    }
}

#[test]
fn test_runs_removed_after_output_failure() {
    let scratch = tempdir().unwrap();
    let config = FinderConfig::default()
        .with_temp_dir(scratch.path().to_path_buf())
        .with_chunk_bytes(200);

    let result = DuplicateFinder::new(config).find_duplicates_in(input(40, 4).as_bytes(), &mut BrokenSink);

    assert!(matches!(result, Err(FinderError::Sort(_))));
    assert_eq!(entries(scratch.path()), 0);
}

/// Requests shutdown as soon as the given phase reports progress.
struct InterruptDuring {
    phase: &'static str,
    current: std::sync::Mutex<String>,
    flag: Arc<AtomicBool>,
}

impl ProgressCallback for InterruptDuring {
    fn on_phase_start(&self, phase: &str, _total: usize) {
        *self.current.lock().unwrap() = phase.to_string();
    }

    fn on_progress(&self, _current: usize, _message: &str) {
        if *self.current.lock().unwrap() == self.phase {
            self.flag.store(true, Ordering::SeqCst);
        }
    }

    fn on_phase_end(&self, _phase: &str) {}
}

fn interrupted_run(phase: &'static str, workers: usize) {
    let scratch = tempdir().unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let callback = Arc::new(InterruptDuring {
        phase,
        current: std::sync::Mutex::new(String::new()),
        flag: flag.clone(),
    });
    let config = FinderConfig::default()
        .with_temp_dir(scratch.path().to_path_buf())
        .with_chunk_bytes(16 * 1024)
        .with_workers(workers)
        .with_shutdown_flag(flag.clone())
        .with_progress_callback(callback);

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    // Enough records that the merge reaches its periodic shutdown check.
    let result = DuplicateFinder::new(config).find_duplicates_in(input(10_000, 50).as_bytes(), &mut groups);

    assert!(matches!(result, Err(FinderError::Interrupted)));
    assert!(flag.load(Ordering::SeqCst));
    assert_eq!(entries(scratch.path()), 0);
}

#[test]
fn test_runs_removed_when_interrupted_while_chunking() {
    interrupted_run("chunking", 1);
    interrupted_run("chunking", 3);
}

#[test]
fn test_runs_removed_when_interrupted_while_merging() {
    interrupted_run("merging", 2);
}
