//! Sorting one chunk into a run.
//!
//! [`sort_chunk`] is a pure function of its chunk: it decodes every line,
//! sorts the records by fingerprint, and spills them to a new run file. It
//! touches no shared state besides creating one file in the store's
//! directory, so any number of workers may call it at once on disjoint
//! chunks.

use super::chunk::Chunk;
use super::run::{Run, RunStore};
use super::{DecodePolicy, SortError};
use crate::record::CertRecord;

/// Result of sorting one chunk.
#[derive(Debug)]
pub struct SortedChunk {
    /// Index of the chunk this run came from.
    pub chunk_index: usize,
    /// The sorted run, not yet registered with the store.
    pub run: Run,
    /// Input lines that were skipped under [`DecodePolicy::Skip`].
    pub skipped: u64,
    /// Raw bytes of input the chunk covered.
    pub input_bytes: u64,
}

/// Decode, sort and persist one chunk.
///
/// Records are ordered by fingerprint, compared as byte strings. The sort is
/// stable, so records sharing a fingerprint keep their input order.
///
/// # Errors
///
/// - [`SortError::Decode`] for the first bad line under [`DecodePolicy::Abort`]
/// - [`SortError::Run`] if the run file cannot be created or written
///
/// No run file survives a failed call.
pub fn sort_chunk(
    chunk: Chunk,
    store: &RunStore,
    policy: DecodePolicy,
) -> Result<SortedChunk, SortError> {
    let Chunk {
        index,
        first_line,
        lines,
        bytes,
    } = chunk;

    let mut records = Vec::with_capacity(lines.len());
    let mut skipped = 0u64;

    for (offset, line) in lines.iter().enumerate() {
        let line_no = first_line + offset as u64;
        match CertRecord::decode_bytes(line) {
            Ok(record) => records.push(record),
            Err(source) => match policy {
                DecodePolicy::Abort => {
                    return Err(SortError::Decode {
                        line: line_no,
                        source,
                    })
                }
                DecodePolicy::Skip => {
                    log::warn!("Skipping line {}: {}", line_no, source);
                    skipped += 1;
                }
            },
        }
    }
    drop(lines);

    records.sort_by(|a, b| a.fingerprint().cmp(b.fingerprint()));

    let mut writer = store.create_run()?;
    for record in &records {
        writer.write_record(record)?;
    }
    let run = writer.finish()?;

    log::debug!(
        "Sorted chunk {} ({} records, {} skipped) into {}",
        index,
        run.records(),
        skipped,
        run.path().display()
    );

    Ok(SortedChunk {
        chunk_index: index,
        run,
        skipped,
        input_bytes: bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DecodeError;
    use crate::sort::testutil::cert_line;

    fn chunk_of(lines: Vec<String>) -> Chunk {
        let lines: Vec<Vec<u8>> = lines.into_iter().map(String::into_bytes).collect();
        let bytes = lines.iter().map(|l| l.len() as u64).sum();
        Chunk {
            index: 0,
            first_line: 1,
            lines,
            bytes,
        }
    }

    fn run_contents(run: &Run) -> Vec<(String, String)> {
        std::fs::read_to_string(run.path())
            .unwrap()
            .lines()
            .map(|l| {
                let r = CertRecord::decode(l).unwrap();
                (r.fingerprint().to_string(), r.encode().to_string())
            })
            .collect()
    }

    #[test]
    fn test_sorts_by_fingerprint() {
        let store = RunStore::new(None).unwrap();
        let chunk = chunk_of(vec![
            cert_line("f3", 0),
            cert_line("f1", 1),
            cert_line("f2", 2),
        ]);

        let sorted = sort_chunk(chunk, &store, DecodePolicy::Abort).unwrap();
        let keys: Vec<String> = run_contents(&sorted.run)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["f1", "f2", "f3"]);
        assert_eq!(sorted.run.records(), 3);
        assert_eq!(sorted.skipped, 0);
    }

    #[test]
    fn test_equal_keys_keep_input_order() {
        let store = RunStore::new(None).unwrap();
        let chunk = chunk_of(vec![
            cert_line("b", 0),
            cert_line("a", 1),
            cert_line("b", 2),
            cert_line("a", 3),
        ]);

        let sorted = sort_chunk(chunk, &store, DecodePolicy::Abort).unwrap();
        let lines: Vec<String> = run_contents(&sorted.run)
            .into_iter()
            .map(|(_, l)| l)
            .collect();
        assert_eq!(
            lines,
            vec![
                cert_line("a", 1),
                cert_line("a", 3),
                cert_line("b", 0),
                cert_line("b", 2)
            ]
        );
    }

    #[test]
    fn test_keys_compare_as_bytes() {
        let store = RunStore::new(None).unwrap();
        let chunk = chunk_of(vec![
            cert_line("a", 0),
            cert_line("B", 1),
            cert_line("AA", 2),
        ]);

        let sorted = sort_chunk(chunk, &store, DecodePolicy::Abort).unwrap();
        let keys: Vec<String> = run_contents(&sorted.run)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["AA", "B", "a"]);
    }

    #[test]
    fn test_abort_reports_input_line_and_leaves_no_file() {
        let store = RunStore::new(None).unwrap();
        let mut chunk = chunk_of(vec![cert_line("a", 0), "{broken".to_string()]);
        chunk.first_line = 41;

        match sort_chunk(chunk, &store, DecodePolicy::Abort) {
            Err(SortError::Decode { line, source }) => {
                assert_eq!(line, 42);
                assert!(matches!(source, DecodeError::Syntax(_)));
            }
            other => panic!("Expected Decode error, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_skip_counts_bad_lines() {
        let store = RunStore::new(None).unwrap();
        let chunk = chunk_of(vec![
            cert_line("a", 0),
            "{}".to_string(),
            "not json".to_string(),
            cert_line("b", 1),
        ]);

        let sorted = sort_chunk(chunk, &store, DecodePolicy::Skip).unwrap();
        assert_eq!(sorted.skipped, 2);
        assert_eq!(sorted.run.records(), 2);
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let store = RunStore::new(None).unwrap();
        let mut chunk = chunk_of(vec![cert_line("a", 0), cert_line("a", 1)]);
        chunk.lines.insert(1, b"{\"x\":\"\xff\xfe\"}\n".to_vec());
        chunk.first_line = 10;

        match sort_chunk(chunk.clone(), &store, DecodePolicy::Abort) {
            Err(SortError::Decode { line, source }) => {
                assert_eq!(line, 11);
                assert!(matches!(source, DecodeError::InvalidUtf8(_)));
            }
            other => panic!("Expected Decode error, got {:?}", other),
        }

        let sorted = sort_chunk(chunk, &store, DecodePolicy::Skip).unwrap();
        assert_eq!(sorted.skipped, 1);
        assert_eq!(sorted.run.records(), 2);
    }

    #[test]
    fn test_all_lines_skipped_still_makes_a_run() {
        let store = RunStore::new(None).unwrap();
        let chunk = chunk_of(vec!["x".to_string(), "y".to_string()]);

        let sorted = sort_chunk(chunk, &store, DecodePolicy::Skip).unwrap();
        assert!(sorted.run.is_empty());
        assert!(sorted.run.path().exists());
    }
}
