// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::budget::WorkerClamp;
use crate::config::consts::METADATA_SUBDIR;
use crate::engine::{ResultReconciler, StepKind};
use crate::errors::PipelineResult;
use crate::mask::{
    collect_scenes, JsonMetadataStore, MaskMergeEngine, MaskSettings, DEFAULT_SHADOW_THRESHOLD,
};
use crate::pipeline::{PipelineContext, RunSummary};
use crate::traits::DatasetSpec;
use crate::workspace::{Artifact, ArtifactKind, CleanupRegistry};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MaskPipelineSettings {
    /// Band dataset holding B02, B03, B04, B08, B8A, B11 and B12 of every scene.
    pub input: String,
    pub output_clouds: String,
    #[serde(default)]
    pub output_shadows: Option<String>,
    /// Minimum metadata cloud percentage that triggers detection; `0` disables the check.
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub min_size_clouds: Option<f64>,
    #[serde(default)]
    pub min_size_shadows: Option<f64>,
    /// Defaults to `cell_misc` inside the shared namespace.
    #[serde(default)]
    pub metadata_dir: Option<PathBuf>,
    #[serde(default = "default_shadow_threshold")]
    pub shadow_threshold: u32,
}

fn default_shadow_threshold() -> u32 {
    DEFAULT_SHADOW_THRESHOLD
}

impl MaskPipelineSettings {
    pub fn new(input: impl Into<String>, output_clouds: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output_clouds: output_clouds.into(),
            output_shadows: None,
            threshold: 0.0,
            min_size_clouds: None,
            min_size_shadows: None,
            metadata_dir: None,
            shadow_threshold: DEFAULT_SHADOW_THRESHOLD,
        }
    }

    pub fn mask_settings(&self) -> MaskSettings {
        MaskSettings {
            threshold: self.threshold,
            shadows: self.output_shadows.is_some(),
            shadow_threshold: self.shadow_threshold,
            min_size_clouds: self.min_size_clouds,
            min_size_shadows: self.min_size_shadows,
        }
    }

    pub fn required_steps(&self) -> Vec<StepKind> {
        let mut kinds = vec![StepKind::DetectMasks, StepKind::Patch];
        if self.min_size_clouds.is_some() || self.min_size_shadows.is_some() {
            kinds.push(StepKind::FilterSmallAreas);
        }
        kinds
    }

    fn needs_metadata(&self) -> bool {
        self.threshold > 0.0 || self.output_shadows.is_some()
    }
}

/// Run the mask pipeline over the scenes of `settings.input`.
///
/// Per-scene masks replaced by a same-date patch are handed to `cleanup`.
pub async fn run_mask(
    ctx: &PipelineContext,
    settings: &MaskPipelineSettings,
    cleanup: &CleanupRegistry,
) -> PipelineResult<RunSummary> {
    ctx.ensure_steps(&settings.required_steps()).await?;

    let shared = ctx.location.open_namespace(&ctx.shared_namespace).await?;
    let mut reconciler = ResultReconciler::new(shared.clone()).await?;

    let entries = ctx.store.list(&settings.input).await?;
    let scenes = collect_scenes(&entries, &shared).await?;

    let options = ctx.pool_options(scenes.len(), WorkerClamp::Warn);
    let mut engine = MaskMergeEngine::new(
        Arc::clone(&ctx.location),
        Arc::clone(&ctx.step),
        options,
        settings.mask_settings(),
    );
    if settings.needs_metadata() {
        let dir = settings
            .metadata_dir
            .clone()
            .unwrap_or_else(|| shared.path().join(METADATA_SUBDIR));
        engine = engine.with_metadata(Arc::new(JsonMetadataStore::new(dir)));
    }

    let outcome = engine.run(scenes, &mut reconciler, cleanup).await?;

    let mut summary = RunSummary {
        failures: outcome.failures,
        ..RunSummary::default()
    };
    summary.datasets.push(
        ctx.publish_dataset(
            DatasetSpec::new(
                settings.output_clouds.clone(),
                ArtifactKind::Raster,
                "Sentinel-2 cloud mask",
            ),
            &outcome.cloud_entries,
        )
        .await?,
    );
    if let Some(output_shadows) = &settings.output_shadows {
        summary.datasets.push(
            ctx.publish_dataset(
                DatasetSpec::new(
                    output_shadows.clone(),
                    ArtifactKind::Raster,
                    "Sentinel-2 shadow mask",
                ),
                &outcome.shadow_entries,
            )
            .await?,
        );
    }

    summary.artifacts = outcome
        .cloud_entries
        .iter()
        .chain(&outcome.shadow_entries)
        .map(|entry| Artifact::raster(&entry.artifact))
        .collect();
    reconciler.verify().await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadows_need_metadata_and_a_filter_needs_its_step() {
        let mut settings = MaskPipelineSettings::new("s2", "s2_clouds");
        assert!(!settings.needs_metadata());
        assert_eq!(
            settings.required_steps(),
            vec![StepKind::DetectMasks, StepKind::Patch]
        );

        settings.output_shadows = Some("s2_shadows".to_string());
        settings.min_size_shadows = Some(0.5);
        assert!(settings.needs_metadata());
        assert!(settings.mask_settings().shadows);
        assert!(settings
            .required_steps()
            .contains(&StepKind::FilterSmallAreas));
    }
}
