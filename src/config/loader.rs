//! Supervisor configuration file handling
//!
//! Reads `~/.research-supervisor/config.toml`. A missing file yields the
//! defaults; every section and field is optional.

use crate::agents::format_parsers::generic::{READ_FILE_MAX_LENGTH, RESULT_MAX_LENGTH};
use crate::agents::manager::ManagerConfig;
use crate::agents::stream_parser::{EmptyCallPolicy, ParserConfig};
use crate::file_storage::{default_data_dir, get_global_supervisor_dir};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable, resolved on PATH when it is a bare name
    pub program: String,
    /// Arguments placed before the positional ones (e.g. a script path)
    pub args: Vec<String>,
    pub resume_flag: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "research-agent".to_string(),
            args: Vec::new(),
            resume_flag: "--resume".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CancellationConfig {
    /// Must cover the worker's sentinel poll interval
    pub poll_interval_ms: u64,
    pub exit_grace_ms: u64,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            exit_grace_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserSettings {
    pub result_max_length: usize,
    pub read_file_max_length: usize,
    pub empty_call_policy: EmptyCallPolicy,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            result_max_length: RESULT_MAX_LENGTH,
            read_file_max_length: READ_FILE_MAX_LENGTH,
            empty_call_policy: EmptyCallPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `~/.research-supervisor/data`
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub worker: WorkerConfig,
    pub cancellation: CancellationConfig,
    pub parser: ParserSettings,
    pub storage: StorageConfig,
}

/// Values given on the command line. They win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub program: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
}

/// `~/.research-supervisor/config.toml`
pub fn default_config_path() -> PathBuf {
    get_global_supervisor_dir().join("config.toml")
}

impl SupervisorConfig {
    /// Read a config file, returning defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: SupervisorConfig = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the given file, or the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load_from(&default_config_path()),
        }
    }

    pub fn apply_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(program) = &overrides.program {
            self.worker.program = program.clone();
        }
        if let Some(data_dir) = &overrides.data_dir {
            self.storage.data_dir = Some(data_dir.clone());
        }
        if let Some(ms) = overrides.poll_interval_ms {
            self.cancellation.poll_interval_ms = ms;
        }
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(default_data_dir)
    }

    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            result_max_length: self.parser.result_max_length,
            read_file_max_length: self.parser.read_file_max_length,
            empty_call_policy: self.parser.empty_call_policy,
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            program: self.worker.program.clone(),
            prefix_args: self.worker.args.clone(),
            resume_flag: self.worker.resume_flag.clone(),
            poll_interval: Duration::from_millis(self.cancellation.poll_interval_ms),
            exit_grace: Duration::from_millis(self.cancellation.exit_grace_ms),
            parser: self.parser_config(),
        }
    }
}
