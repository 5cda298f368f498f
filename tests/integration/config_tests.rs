use clap::Parser;
use ctdupe::cli::{Cli, Commands};
use ctdupe::config::{Config, DEFAULT_MEMORY, ENV_PREFIX};
use ctdupe::sort::DecodePolicy;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .extract()
        .unwrap();

    assert_eq!(config, Config::default());
    assert_eq!(config.memory, DEFAULT_MEMORY);
    assert_eq!(config.workers, None);
    assert!(config.atomic_output);
    assert!(!config.skip_invalid);
}

#[test]
fn test_config_load_from_env() {
    figment::Jail::expect_with(|jail| {
        jail.set_env("CTDUPE_WORKERS", "6");
        jail.set_env("CTDUPE_SKIP_INVALID", "true");
        jail.set_env("CTDUPE_MEMORY", "4096");

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        assert_eq!(config.workers, Some(6));
        assert!(config.skip_invalid);
        assert_eq!(config.memory, 4096);
        assert_eq!(config.decode_policy(), DecodePolicy::Skip);
        Ok(())
    });
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
memory = 2147483648
chunk_size = 1048576
workers = 2
temp_dir = "/scratch/runs"
atomic_output = false
"#,
    )
    .unwrap();

    let config = Config::load_from_path(&config_path).unwrap();

    assert_eq!(config.memory, 2 << 30);
    assert_eq!(config.chunk_size, Some(1 << 20));
    assert_eq!(config.workers, Some(2));
    assert_eq!(config.temp_dir, Some(PathBuf::from("/scratch/runs")));
    assert!(!config.atomic_output);
    assert_eq!(config.effective_chunk_bytes(), 1 << 20);
}

#[test]
fn test_config_missing_file_is_defaults() {
    let temp_dir = tempdir().unwrap();
    let config = Config::load_from_path(&temp_dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_invalid_toml_is_error() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "workers = \"several\"").unwrap();

    assert!(Config::load_from_path(&config_path).is_err());

    let figment =
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&config_path));
    let result: Result<Config, _> = figment.extract();
    assert!(result.is_err());
}

#[test]
fn test_config_invalid_file_falls_back_to_defaults() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("broken.toml", "memory = [1, 2")?;
        let config = Config::load(Some(std::path::Path::new("broken.toml")));
        assert_eq!(config, Config::default());
        Ok(())
    });
}

#[test]
fn test_env_overrides_file() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("ctdupe.toml", "workers = 2\nskip_invalid = true")?;
        jail.set_env("CTDUPE_WORKERS", "5");

        let config = Config::load(Some(std::path::Path::new("ctdupe.toml")));
        assert_eq!(config.workers, Some(5));
        assert!(config.skip_invalid);
        Ok(())
    });
}

#[test]
fn test_cli_overrides_config() {
    let mut config = Config {
        memory: 1000,
        workers: Some(2),
        skip_invalid: true,
        ..Config::default()
    };

    let cli = Cli::try_parse_from([
        "ctdupe",
        "find",
        "in.jsonl",
        "-j",
        "4",
        "--no-skip-invalid",
        "--no-atomic",
    ])
    .unwrap();
    let Commands::Find(args) = &cli.command;
    config.merge_find_args(args);

    assert_eq!(config.workers, Some(4));
    assert_eq!(config.memory, 1000);
    assert!(!config.skip_invalid);
    assert!(!config.atomic_output);
    assert_eq!(config.effective_chunk_bytes(), 250);
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = Config {
        workers: Some(3),
        temp_dir: Some(PathBuf::from("/tmp/x")),
        ..Config::default()
    };
    let text = toml::to_string_pretty(&config).unwrap();
    assert!(text.contains("workers = 3"));

    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, text).unwrap();
    assert_eq!(Config::load_from_path(&path).unwrap(), config);
}
