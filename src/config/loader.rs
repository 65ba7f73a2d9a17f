// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backends::StepPrograms;
use crate::budget::WorkerClamp;
use crate::config::consts::{DEFAULT_MEMORY_MB, FALLBACK_WORKERS};
use crate::errors::{ConfigError, FailureStrategy};
use crate::pipeline::{ExecutorSettings, ImportSettings, MaskPipelineSettings};

/// Complete configuration of one scenestack run.
///
/// Loaded from YAML or TOML; the format follows the file extension.
///
/// # Example
/// ```yaml
/// location: /data/grassdata/utm32n
/// shared_namespace: sentinel
/// failure_strategy: continue_on_error
/// executor_options:
///   max_concurrency: 4
///   memory_mb: 500
/// store: /data/grassdata/utm32n/datasets
/// pipeline:
///   kind: mask
///   input: s2_bands
///   output_clouds: s2_clouds
///   threshold: 10
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Root directory holding every namespace.
    pub location: PathBuf,
    pub shared_namespace: String,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    #[serde(default)]
    pub executor_options: ExecutorOptions,
    #[serde(default)]
    pub steps: StepPrograms,
    /// Directory of the file-backed temporal store.
    pub store: PathBuf,
    pub pipeline: PipelineConfig,
}

/// The pipeline to run, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineConfig {
    Import(ImportSettings),
    Mask(MaskPipelineSettings),
}

impl PipelineConfig {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineConfig::Import(_) => "import",
            PipelineConfig::Mask(_) => "mask",
        }
    }
}

/// Worker pool options.
///
/// * `max_concurrency` - requested workers (defaults to the CPU count)
/// * `memory_mb` - memory per worker
/// * `unit_timeout_seconds` - wall-clock limit per unit; none by default
/// * `clamp_workers_to_cpus` - overrides the pipeline's own clamping choice
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExecutorOptions {
    pub max_concurrency: Option<usize>,
    pub memory_mb: Option<u64>,
    pub unit_timeout_seconds: Option<u64>,
    pub clamp_workers_to_cpus: Option<bool>,
}

impl ExecutorOptions {
    pub fn workers(&self) -> usize {
        self.max_concurrency.unwrap_or_else(default_concurrency)
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory_mb.unwrap_or(DEFAULT_MEMORY_MB)
    }

    pub fn executor_settings(&self, failure_strategy: FailureStrategy) -> ExecutorSettings {
        ExecutorSettings {
            workers: self.workers(),
            memory_mb: self.memory_mb(),
            unit_timeout: self.unit_timeout_seconds.map(Duration::from_secs),
            clamp: self.clamp_workers_to_cpus.map(|clamp| {
                if clamp {
                    WorkerClamp::ClampToCpus
                } else {
                    WorkerClamp::Warn
                }
            }),
            failure_strategy,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}

/// Load a config from a YAML or TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let parse_error = |reason: String| ConfigError::Parse {
        path: display.clone(),
        reason,
    };
    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string())),
        "toml" => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Load a config and check it against every validation rule.
///
/// All rule violations are reported together.
pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let cfg = load_config(path)?;
    crate::config::validate_config(&cfg).map_err(ConfigError::Invalid)?;
    Ok(cfg)
}
