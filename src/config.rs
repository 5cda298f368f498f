//! Layered application configuration.
//!
//! Settings are merged from, lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config <PATH>`, or `config.toml` in the platform
//!    config directory)
//! 3. `CTDUPE_*` environment variables (e.g. `CTDUPE_WORKERS=8`)
//! 4. Command-line flags
//!
//! # Example file
//!
//! ```toml
//! memory = 4294967296       # bytes of chunks in flight
//! workers = 8
//! temp_dir = "/scratch/ctdupe"
//! skip_invalid = true
//! ```

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cli::FindArgs;
use crate::duplicates::FinderConfig;
use crate::sort::DecodePolicy;

/// Default total memory for chunks in flight (1 GiB).
pub const DEFAULT_MEMORY: u64 = 1 << 30;

/// Prefix of environment variables read into [`Config`].
pub const ENV_PREFIX: &str = "CTDUPE_";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Total bytes of input held in memory across all workers.
    pub memory: u64,
    /// Explicit per-chunk budget; derived from `memory / workers` if unset.
    pub chunk_size: Option<u64>,
    /// Number of sort workers; the number of CPUs if unset.
    pub workers: Option<usize>,
    /// Parent directory for temporary runs; the system temp dir if unset.
    pub temp_dir: Option<PathBuf>,
    /// Skip undecodable lines instead of failing.
    pub skip_invalid: bool,
    /// Commit output files by renaming a finished temp file.
    pub atomic_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory: DEFAULT_MEMORY,
            chunk_size: None,
            workers: None,
            temp_dir: None,
            skip_invalid: false,
            atomic_output: true,
        }
    }
}

impl Config {
    /// Load the configuration from file and environment.
    ///
    /// An unreadable or invalid configuration is logged and the defaults are
    /// used instead.
    #[must_use]
    pub fn load(path: Option<&Path>) -> Self {
        let file = path.map(Path::to_path_buf).or_else(Self::default_path);
        match Self::figment(file.as_deref()).extract() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring invalid configuration, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Load only the given TOML file over the defaults, without environment.
    ///
    /// # Errors
    ///
    /// Returns a figment error if the file is not valid TOML or a value has
    /// the wrong type. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .extract()
    }

    /// The provider stack: defaults, then the file (if any), then env.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            log::debug!("Reading configuration from {}", file.display());
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Platform-specific path of the default configuration file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "ctdupe", "ctdupe")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply command-line overrides.
    pub fn merge_find_args(&mut self, args: &FindArgs) {
        if let Some(memory) = args.memory {
            self.memory = memory;
        }
        if args.chunk_size.is_some() {
            self.chunk_size = args.chunk_size;
        }
        if args.workers.is_some() {
            self.workers = args.workers;
        }
        if args.temp_dir.is_some() {
            self.temp_dir = args.temp_dir.clone();
        }
        if let Some(skip) = args.skip_invalid_override() {
            self.skip_invalid = skip;
        }
        if args.no_atomic {
            self.atomic_output = false;
        }
    }

    /// Effective worker count (at least 1).
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(usize::from)
                    .unwrap_or(1)
            })
            .max(1)
    }

    /// Effective per-chunk byte budget (at least 1).
    #[must_use]
    pub fn effective_chunk_bytes(&self) -> u64 {
        self.chunk_size
            .unwrap_or_else(|| self.memory / self.effective_workers() as u64)
            .max(1)
    }

    /// Decode policy selected by `skip_invalid`.
    #[must_use]
    pub fn decode_policy(&self) -> DecodePolicy {
        if self.skip_invalid {
            DecodePolicy::Skip
        } else {
            DecodePolicy::Abort
        }
    }

    /// Build the finder configuration these settings describe.
    #[must_use]
    pub fn finder_config(&self) -> FinderConfig {
        let mut config = FinderConfig::default()
            .with_workers(self.effective_workers())
            .with_chunk_bytes(self.effective_chunk_bytes())
            .with_decode_policy(self.decode_policy())
            .with_atomic_output(self.atomic_output);
        if let Some(ref dir) = self.temp_dir {
            config = config.with_temp_dir(dir.clone());
        }
        config
    }
}
