use ctdupe::duplicates::{DuplicateFinder, DuplicateGroup, FinderConfig, FinderError};
use ctdupe::record::DecodeError;
use ctdupe::sort::{DecodePolicy, SortError};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn record(fingerprint: &str, id: u32) -> String {
    format!(
        r#"{{"data":{{"cert_index":{id},"leaf_cert":{{"fingerprint":"{fingerprint}","subject":{{"CN":"host{id}.example"}}}}}},"message_type":"certificate_update"}}"#
    )
}

fn write_input(path: &Path, records: &[String]) {
    let mut text = String::new();
    for r in records {
        text.push_str(r);
        text.push('\n');
    }
    fs::write(path, text).unwrap();
}

fn read_groups(path: &Path) -> Vec<DuplicateGroup> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn texts(group: &DuplicateGroup) -> Vec<String> {
    group.certificate_texts().map(str::to_string).collect()
}

fn run(config: FinderConfig, records: &[String]) -> Vec<DuplicateGroup> {
    let dir = tempdir().unwrap();
    let input = dir.path().join("records.jsonlines");
    let output = dir.path().join("duplicates.jsonlines");
    write_input(&input, records);

    DuplicateFinder::new(config)
        .find_duplicates(&input, &output)
        .unwrap();
    read_groups(&output)
}

#[test]
fn test_no_duplicates_gives_empty_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_input(&input, &[record("f1", 1), record("f2", 2), record("f3", 3)]);

    let summary = DuplicateFinder::with_defaults()
        .find_duplicates(&input, &output)
        .unwrap();

    assert_eq!(fs::read_to_string(&output).unwrap(), "");
    assert_eq!(summary.records_read, 3);
    assert_eq!(summary.duplicate_groups, 0);
}

#[test]
fn test_one_duplicate_pair() {
    let records = [record("f1", 1), record("f2", 2), record("f1", 3)];
    let groups = run(FinderConfig::default(), &records);

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].fingerprint, "f1");
    assert_eq!(texts(&groups[0]), vec![records[0].clone(), records[2].clone()]);
}

#[test]
fn test_duplicates_across_chunk_boundary() {
    let records = [record("f2", 1), record("f1", 2), record("f1", 3)];
    // Each line is well over 40 bytes, so every record gets its own chunk.
    let config = FinderConfig::default().with_chunk_bytes(40);

    let groups = run(config, &records);

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].fingerprint, "f1");
    assert_eq!(texts(&groups[0]), vec![records[1].clone(), records[2].clone()]);
}

#[test]
fn test_parallel_matches_sequential() {
    let records: Vec<String> = (0..200)
        .map(|i| record(&format!("fp{:02}", (i * 7) % 37), i))
        .collect();

    let as_sets = |groups: Vec<DuplicateGroup>| -> BTreeMap<String, Vec<String>> {
        groups
            .iter()
            .map(|g| {
                let mut members = texts(g);
                members.sort();
                (g.fingerprint.clone(), members)
            })
            .collect()
    };

    let sequential = run(
        FinderConfig::default().with_workers(1).with_chunk_bytes(1024),
        &records,
    );
    let parallel = run(
        FinderConfig::default().with_workers(4).with_chunk_bytes(1024),
        &records,
    );

    assert_eq!(sequential.len(), 37);
    assert_eq!(as_sets(sequential), as_sets(parallel));
}

#[test]
fn test_groups_are_complete_and_ascending() {
    let records: Vec<String> = (0..60)
        .map(|i| record(&format!("k{}", i % 9), i))
        .chain(std::iter::once(record("lonely", 999)))
        .collect();

    let groups = run(
        FinderConfig::default().with_workers(3).with_chunk_bytes(500),
        &records,
    );

    let keys: Vec<&str> = groups.iter().map(|g| g.fingerprint.as_str()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(keys, sorted);
    assert!(!keys.contains(&"lonely"));

    let total: usize = groups.iter().map(DuplicateGroup::len).sum();
    assert_eq!(total, 60);
}

#[test]
fn test_rerun_is_identical() {
    let records: Vec<String> = (0..50)
        .map(|i| record(&format!("d{}", i % 5), i))
        .collect();
    let config = FinderConfig::default().with_workers(2).with_chunk_bytes(700);

    let first = run(config.clone(), &records);
    let second = run(config, &records);

    let render = |groups: &[DuplicateGroup]| serde_json::to_string(groups).unwrap();
    assert_eq!(render(&first), render(&second));
}

#[test]
fn test_empty_input_file() {
    let groups = run(FinderConfig::default(), &[]);
    assert!(groups.is_empty());
}

#[test]
fn test_crlf_input() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    fs::write(
        &input,
        format!("{}\r\n{}\r\n", record("c", 1), record("c", 2)),
    )
    .unwrap();

    DuplicateFinder::with_defaults()
        .find_duplicates(&input, &output)
        .unwrap();
    let groups = read_groups(&output);
    assert_eq!(texts(&groups[0]), vec![record("c", 1), record("c", 2)]);
}

#[test]
fn test_bad_line_aborts_by_default() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_input(
        &input,
        &[record("a", 1), r#"{"data":{"leaf_cert":{}}}"#.to_string(), record("a", 2)],
    );

    let err = DuplicateFinder::with_defaults()
        .find_duplicates(&input, &output)
        .unwrap_err();

    assert!(matches!(
        err,
        FinderError::Sort(SortError::Decode { line: 2, .. })
    ));
    assert!(!output.exists());
}

#[test]
fn test_skip_policy_counts_bad_lines() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_input(
        &input,
        &[
            record("a", 1),
            "garbage".to_string(),
            r#"{"data":{"leaf_cert":{"fingerprint":42}}}"#.to_string(),
            record("a", 2),
        ],
    );

    let finder = DuplicateFinder::new(FinderConfig::default().with_decode_policy(DecodePolicy::Skip));
    let summary = finder.find_duplicates(&input, &output).unwrap();

    assert_eq!(summary.lines_skipped, 2);
    assert_eq!(summary.records_read, 2);
    assert_eq!(read_groups(&output).len(), 1);
}

#[test]
fn test_unicode_fingerprints_sort_bytewise() {
    let records = [
        record("é", 1),
        record("z", 2),
        record("é", 3),
        record("z", 4),
    ];
    let groups = run(FinderConfig::default().with_chunk_bytes(1), &records);

    let keys: Vec<&str> = groups.iter().map(|g| g.fingerprint.as_str()).collect();
    assert_eq!(keys, vec!["z", "é"]);
}

#[test]
fn test_non_utf8_line_is_a_decode_error() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    let mut bytes = Vec::new();
    bytes.extend_from_slice(record("a", 1).as_bytes());
    bytes.extend_from_slice(b"\n{\"x\":\"\xff\xfe\"}\n");
    bytes.extend_from_slice(record("a", 2).as_bytes());
    bytes.push(b'\n');
    fs::write(&input, &bytes).unwrap();

    let err = DuplicateFinder::with_defaults()
        .find_duplicates(&input, &output)
        .unwrap_err();
    assert!(matches!(
        err,
        FinderError::Sort(SortError::Decode {
            line: 2,
            source: DecodeError::InvalidUtf8(_)
        })
    ));

    let finder = DuplicateFinder::new(FinderConfig::default().with_decode_policy(DecodePolicy::Skip));
    let summary = finder.find_duplicates(&input, &output).unwrap();
    assert_eq!(summary.lines_skipped, 1);
    assert_eq!(summary.duplicate_groups, 1);
    assert_eq!(read_groups(&output)[0].len(), 2);
}

#[test]
fn test_repeated_keys_use_the_last_value() {
    let line = concat!(
        r#"{"data":{"leaf_cert":{"fingerprint":"a"}},"#,
        r#""data":{"leaf_cert":{"fingerprint":"a"}}}"#
    );
    let groups = run(
        FinderConfig::default(),
        &[line.to_string(), line.to_string(), record("b", 3)],
    );

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].fingerprint, "a");
    assert_eq!(texts(&groups[0]), vec![line, line]);
}
