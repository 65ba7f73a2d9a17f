// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! External programs as processing steps.
//!
//! Each [`StepRequest`] becomes one child process. Arguments use the
//! `key=value` convention of the processing tools; layer references are
//! resolved to artifact file paths. The worker context reaches the child only
//! through its arguments, working directory and these variables:
//!
//! | Variable                    | Value                               |
//! |-----------------------------|-------------------------------------|
//! | `SCENESTACK_NAMESPACE`      | worker context name                 |
//! | `SCENESTACK_NAMESPACE_PATH` | private namespace directory         |
//! | `SCENESTACK_MEMORY_MB`      | per-worker memory budget            |
//! | `SCENESTACK_REGION`         | region name, when one is configured |

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::engine::{LayerRef, StepKind, StepRequest};
use crate::errors::StepError;
use crate::traits::{ProcessingStep, StepInvocation, StepOutcome};
use crate::workspace::{Artifact, ArtifactKind};

const NO_OVERLAP_MARKER: &str = "does not overlap current computational region";
const STDERR_TAIL_LINES: usize = 20;

/// Program run for each step kind, plus extra child environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StepPrograms {
    pub atmospheric_correction: String,
    pub import: String,
    pub offset: String,
    pub mask_detection: String,
    pub patch: String,
    pub area_filter: String,
    pub env: BTreeMap<String, String>,
}

impl Default for StepPrograms {
    fn default() -> Self {
        Self {
            atmospheric_correction: "i.sentinel-2.sen2cor".to_string(),
            import: "i.sentinel.import".to_string(),
            offset: "r.mapcalc".to_string(),
            mask_detection: "i.sentinel.mask".to_string(),
            patch: "r.patch".to_string(),
            area_filter: "r.reclass.area".to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl StepPrograms {
    pub fn program(&self, kind: StepKind) -> &str {
        match kind {
            StepKind::AtmosphericCorrection => &self.atmospheric_correction,
            StepKind::Import => &self.import,
            StepKind::ApplyOffset => &self.offset,
            StepKind::DetectMasks => &self.mask_detection,
            StepKind::Patch => &self.patch,
            StepKind::FilterSmallAreas => &self.area_filter,
        }
    }
}

/// Runs external programs inside worker contexts.
pub struct CommandStep {
    programs: StepPrograms,
}

impl CommandStep {
    pub fn new(programs: StepPrograms) -> Self {
        Self { programs }
    }

    /// Command-line arguments for one request.
    pub fn arguments(invocation: &StepInvocation<'_>) -> Vec<String> {
        let context = invocation.context;
        let namespace = context.namespace();
        let input = invocation
            .input
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let layer_path = |layer: &LayerRef, kind: ArtifactKind| {
            invocation
                .resolve(layer)
                .artifact_path(&Artifact {
                    kind,
                    name: layer.name.clone(),
                })
                .display()
                .to_string()
        };
        let output_path =
            |artifact: &Artifact| namespace.artifact_path(artifact).display().to_string();

        let mut args = Vec::new();
        match invocation.request {
            StepRequest::AtmosphericCorrection {
                sen2cor_home,
                output_dir,
            } => {
                args.push(format!("input_file={}", input));
                args.push(format!("output_dir={}", output_dir.display()));
                args.push(format!("sen2cor_path={}", sen2cor_home.display()));
                args.push("nprocs=1".to_string());
            }
            StepRequest::Import { variant, options } => {
                let mut flags = String::from("r");
                if options.zero_to_null {
                    flags.push('n');
                }
                if variant.resamples() {
                    flags.push('i');
                }
                if variant.cloud_output().is_some() {
                    flags.push('c');
                }
                args.push(format!("-{}", flags));
                args.push(format!("input={}", input));
                args.push(format!("output={}", namespace.path().display()));
                args.push(format!("memory={}", context.memory_mb()));
                if let Some(pattern) = &options.pattern {
                    args.push(format!("pattern={}", pattern));
                }
                if let Some(pattern_file) = &options.pattern_file {
                    args.push(format!("pattern_file={}", pattern_file));
                }
                if let Some(metadata) = &options.metadata_dir {
                    args.push(format!("metadata={}", metadata.display()));
                }
                if let Some(cloud_output) = variant.cloud_output() {
                    args.push(format!("cloud_output={}", cloud_output));
                }
                if let Some(region) = &context.config().region {
                    args.push("extent=region".to_string());
                    args.push(format!("region={}", region));
                }
            }
            StepRequest::ApplyOffset { offset } => {
                args.push(format!("input={}", namespace.path().join("raster").display()));
                args.push(format!("offset={}", offset));
                args.push("min=0".to_string());
            }
            StepRequest::DetectMasks(mask) => {
                args.push(if mask.shadow.is_some() { "-s" } else { "-sc" }.to_string());
                for (role, band) in mask.bands.roles() {
                    args.push(format!("{}={}", role, layer_path(band, ArtifactKind::Raster)));
                }
                args.push(format!("cloud_raster={}", output_path(&mask.cloud_output)));
                if let Some(shadow) = &mask.shadow {
                    args.push(format!("shadow_raster={}", output_path(&shadow.output)));
                    args.push(format!("metadata={}", shadow.metadata.display()));
                    args.push(format!("shadow_threshold={}", shadow.threshold));
                }
            }
            StepRequest::Patch { inputs, output } => {
                let inputs: Vec<String> = inputs
                    .iter()
                    .map(|layer| layer_path(layer, output.kind))
                    .collect();
                args.push(format!("input={}", inputs.join(",")));
                args.push(format!("output={}", output_path(output)));
            }
            StepRequest::FilterSmallAreas {
                input,
                output,
                min_size_ha,
            } => {
                args.push(format!("input={}", layer_path(input, output.kind)));
                args.push(format!("output={}", output_path(output)));
                args.push(format!("value={}", min_size_ha));
                args.push("mode=greater".to_string());
            }
        }
        args
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn no_overlap_warnings(output: &str, input: Option<&Path>, scene: &str) -> Vec<String> {
    let subject = input
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| scene.to_string());
    if output.lines().any(|line| line.contains(NO_OVERLAP_MARKER)) {
        vec![format!(
            "Input raster <{}> does not overlap current computational region",
            subject
        )]
    } else {
        Vec::new()
    }
}

#[async_trait]
impl ProcessingStep for CommandStep {
    async fn invoke(&self, invocation: StepInvocation<'_>) -> Result<StepOutcome, StepError> {
        let program = self.programs.program(invocation.request.kind());
        let context = invocation.context;
        let namespace = context.namespace();

        let mut command = Command::new(program);
        command
            .args(Self::arguments(&invocation))
            .current_dir(namespace.path())
            .envs(&self.programs.env)
            .envs(&context.config().env)
            .env("SCENESTACK_NAMESPACE", context.id())
            .env("SCENESTACK_NAMESPACE_PATH", namespace.path())
            .env("SCENESTACK_MEMORY_MB", context.memory_mb().to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(region) = &context.config().region {
            command.env("SCENESTACK_REGION", region);
        }

        tracing::debug!(
            program = program,
            context = context.id(),
            "Launching external step"
        );
        let output = command.output().await.map_err(|e| StepError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(StepError::NonZeroExit {
                program: program.to_string(),
                code: output.status.code(),
                stderr: stderr_tail(&stderr),
            });
        }

        let mut warnings = no_overlap_warnings(&stderr, invocation.input, invocation.scene);
        if warnings.is_empty() {
            warnings = no_overlap_warnings(&stdout, invocation.input, invocation.scene);
        }
        let produced = namespace.list_all().await?;
        Ok(StepOutcome { produced, warnings })
    }

    async fn ensure_available(&self, kind: StepKind) -> Result<(), StepError> {
        let program = self.programs.program(kind);
        let status = Command::new(program)
            .arg("--help")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| StepError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(StepError::NonZeroExit {
                program: program.to_string(),
                code: status.code(),
                stderr: "'--help' did not succeed".to_string(),
            })
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
