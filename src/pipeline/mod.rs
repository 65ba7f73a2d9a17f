// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! End-to-end runs: importing scenes into a band dataset, and computing
//! cloud/shadow mask datasets from one.

pub mod import;
pub mod mask;

pub use import::{
    discover_scenes, run_import, AtmosphericCorrection, Extent, ImportSettings, InputLayout,
    SceneInput,
};
pub use mask::{run_mask, MaskPipelineSettings};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::budget::{BudgetRequest, HostCapacity, ResourceBudget, WorkerClamp};
use crate::engine::{IsolatedWorkerPool, PoolOptions, PoolReport, StepKind, WorkUnit};
use crate::errors::{FailureStrategy, PipelineError, PipelineResult, UnitFailure};
use crate::observability::messages::temporal::DatasetCreated;
use crate::observability::messages::StructuredLog;
use crate::temporal::RegisterEntry;
use crate::traits::{DatasetSpec, ProcessingStep, TemporalStore};
use crate::workspace::{Artifact, ArtifactKind, Location};

/// Pool settings requested by the user, before budgeting.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub memory_mb: u64,
    pub unit_timeout: Option<Duration>,
    /// `None` keeps the pipeline's own choice.
    pub clamp: Option<WorkerClamp>,
    pub failure_strategy: FailureStrategy,
}

/// Everything a pipeline run needs besides its own settings.
pub struct PipelineContext {
    pub location: Arc<Location>,
    pub shared_namespace: String,
    pub step: Arc<dyn ProcessingStep>,
    pub store: Arc<dyn TemporalStore>,
    pub executor: ExecutorSettings,
    pub host: HostCapacity,
}

impl PipelineContext {
    /// Budget a pool for `pending_units` and turn it into pool options.
    pub fn pool_options(&self, pending_units: usize, default_clamp: WorkerClamp) -> PoolOptions {
        let budget = ResourceBudget::compute(
            &BudgetRequest {
                workers: self.executor.workers,
                memory_mb: self.executor.memory_mb,
                pending_units,
                clamp: self.executor.clamp.unwrap_or(default_clamp),
            },
            &self.host,
        );
        PoolOptions::from_budget(&budget)
            .with_timeout(self.executor.unit_timeout)
            .with_failure_strategy(self.executor.failure_strategy)
    }

    /// Fail with [`PipelineError::StepUnavailable`] unless every step can be launched.
    pub async fn ensure_steps(&self, kinds: &[StepKind]) -> PipelineResult<()> {
        for kind in kinds {
            self.step
                .ensure_available(*kind)
                .await
                .map_err(|e| PipelineError::StepUnavailable {
                    step: format!("{} ({})", kind, self.step.name()),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Run `units` to completion. A cancelled pool aborts the run.
    pub(crate) async fn run_pool(
        &self,
        label: &str,
        options: PoolOptions,
        units: Vec<WorkUnit>,
    ) -> PipelineResult<PoolReport> {
        if units.is_empty() {
            return Ok(PoolReport::default());
        }
        let report = IsolatedWorkerPool::run(
            label,
            Arc::clone(&self.location),
            Arc::clone(&self.step),
            options,
            units,
        )
        .await?;
        if !report.cancelled.is_empty() {
            return Err(PipelineError::Cancelled);
        }
        Ok(report)
    }

    /// (Re)create a dataset and register `entries` in it.
    pub(crate) async fn publish_dataset(
        &self,
        spec: DatasetSpec,
        entries: &[RegisterEntry],
    ) -> PipelineResult<CreatedDataset> {
        self.store.create(&spec).await?;
        let registered = self.store.register(&spec.name, entries).await?;
        DatasetCreated {
            dataset: &spec.name,
            kind: spec.kind.dir_name(),
            entry_count: registered,
        }
        .log();
        Ok(CreatedDataset {
            name: spec.name,
            kind: spec.kind,
            entries: registered,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedDataset {
    pub name: String,
    pub kind: ArtifactKind,
    pub entries: usize,
}

/// What a run produced and what went wrong along the way.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub datasets: Vec<CreatedDataset>,
    /// Artifacts in the shared namespace that the datasets point at.
    pub artifacts: Vec<Artifact>,
    pub failures: Vec<UnitFailure>,
    pub warnings: Vec<String>,
}

impl RunSummary {
    /// Every unit succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Datasets:")?;
        for dataset in &self.datasets {
            writeln!(
                f,
                "  <{}> ({}, {} entries)",
                dataset.name, dataset.kind, dataset.entries
            )?;
        }
        writeln!(f, "Artifacts: {}", self.artifacts.len())?;
        if !self.warnings.is_empty() {
            writeln!(f, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  {}", warning)?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failed units:")?;
            for failure in &self.failures {
                writeln!(f, "  {}", failure)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_datasets_and_failures() {
        let summary = RunSummary {
            datasets: vec![CreatedDataset {
                name: "s2".to_string(),
                kind: ArtifactKind::Raster,
                entries: 7,
            }],
            artifacts: Vec::new(),
            failures: vec![UnitFailure {
                unit_id: "S2_import_2".to_string(),
                scene: "S2B_MSIL1C_20210615".to_string(),
                step: Some(StepKind::Import),
                reason: "exit 1".to_string(),
            }],
            warnings: Vec::new(),
        };

        let text = summary.to_string();
        assert!(text.contains("<s2> (raster, 7 entries)"));
        assert!(text.contains("S2_import_2"));
        assert!(!summary.is_success());
    }
}
