use clap::Parser;
use ctdupe::cli::Cli;
use ctdupe::duplicates::FinderError;
use ctdupe::error::ExitCode;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn record(fingerprint: &str, id: u32) -> String {
    format!(r#"{{"data":{{"cert_index":{id},"leaf_cert":{{"fingerprint":"{fingerprint}"}}}}}}"#)
}

/// Run `ctdupe find` on `lines` with every setting pinned on the command
/// line, so concurrent environment changes cannot leak in.
fn run_find(dir: &TempDir, lines: &[String], extra: &[&str]) -> anyhow::Result<ExitCode> {
    let input = dir.path().join("records.jsonlines");
    fs::write(&input, lines.join("\n") + "\n").unwrap();
    run_cli(dir.path(), &input, extra)
}

fn run_cli(dir: &Path, input: &Path, extra: &[&str]) -> anyhow::Result<ExitCode> {
    let output = dir.join("duplicates.jsonlines");
    let scratch = dir.join("scratch");
    fs::create_dir_all(&scratch).unwrap();
    let config = dir.join("absent.toml");

    let mut argv = vec![
        "ctdupe".to_string(),
        "-q".to_string(),
        "--config".to_string(),
        config.display().to_string(),
        "find".to_string(),
        input.display().to_string(),
        "-o".to_string(),
        output.display().to_string(),
        "-j".to_string(),
        "2".to_string(),
        "--memory".to_string(),
        "256".to_string(),
        "--temp-dir".to_string(),
        scratch.display().to_string(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));

    ctdupe::run_app(Cli::try_parse_from(argv).unwrap())
}

#[test]
fn test_duplicates_found_exits_success() {
    let dir = tempdir().unwrap();
    let lines = vec![
        record("aa", 1),
        record("bb", 2),
        record("aa", 3),
        record("cc", 4),
        record("bb", 5),
    ];

    let code = run_find(&dir, &lines, &["--no-skip-invalid"]).unwrap();
    assert_eq!(code, ExitCode::Success);

    let output = fs::read_to_string(dir.path().join("duplicates.jsonlines")).unwrap();
    let fingerprints: Vec<String> = output
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["fingerprint"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(fingerprints, vec!["aa", "bb"]);
    assert!(fs::read_dir(dir.path().join("scratch")).unwrap().next().is_none());
}

#[test]
fn test_no_duplicates_exit_code() {
    let dir = tempdir().unwrap();
    let lines = vec![record("aa", 1), record("bb", 2)];

    let code = run_find(&dir, &lines, &["--no-skip-invalid"]).unwrap();
    assert_eq!(code, ExitCode::NoDuplicates);
    assert_eq!(
        fs::read_to_string(dir.path().join("duplicates.jsonlines")).unwrap(),
        ""
    );
}

#[test]
fn test_skipped_lines_exit_partial_success() {
    let dir = tempdir().unwrap();
    let lines = vec![
        record("aa", 1),
        "not json".to_string(),
        record("aa", 2),
    ];

    let code = run_find(&dir, &lines, &["--skip-invalid"]).unwrap();
    assert_eq!(code, ExitCode::PartialSuccess);
}

#[test]
fn test_invalid_line_fails_without_skip() {
    let dir = tempdir().unwrap();
    let lines = vec![record("aa", 1), "{}".to_string(), record("aa", 2)];

    let err = run_find(&dir, &lines, &["--no-skip-invalid"]).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to find duplicates"));
    assert!(!dir.path().join("duplicates.jsonlines").exists());
}

#[test]
fn test_missing_input_is_reported() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.jsonl");

    let err = run_cli(dir.path(), &missing, &["--no-skip-invalid"]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FinderError>(),
        Some(FinderError::InputNotFound(path)) if path == &missing
    ));
}

#[test]
fn test_json_summary_run_succeeds() {
    let dir = tempdir().unwrap();
    let lines = vec![record("aa", 1), record("aa", 2)];

    let code = run_find(&dir, &lines, &["--no-skip-invalid", "--json-summary"]).unwrap();
    assert_eq!(code, ExitCode::Success);
}
