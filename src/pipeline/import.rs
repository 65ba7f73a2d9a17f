// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Import a directory of scenes into a band dataset, an optional cloud
//! dataset and one sub-dataset per band of the band pattern.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::budget::WorkerClamp;
use crate::config::consts::METADATA_SUBDIR;
use crate::engine::{
    CloudOutput, ImportOptions, ImportVariant, ResultReconciler, StepKind, StepRequest, WorkUnit,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::observability::messages::temporal::InputEntrySkipped;
use crate::observability::messages::StructuredLog;
use crate::pipeline::{PipelineContext, RunSummary};
use crate::temporal::{BandPattern, LayerKind, TemporalIndexer};
use crate::traits::DatasetSpec;
use crate::workspace::{ArtifactKind, CleanupRegistry, ContextConfig};

/// How scenes are laid out in the input directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputLayout {
    /// `.SAFE` folders and `.zip` archives side by side.
    #[default]
    Flat,
    /// One folder per scene.
    PerScene,
}

/// Spatial extent of the imported layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extent {
    #[default]
    Input,
    Region,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AtmosphericCorrection {
    pub sen2cor_home: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportSettings {
    pub input_dir: PathBuf,
    #[serde(default)]
    pub layout: InputLayout,
    /// Band dataset name; also the prefix of the band sub-datasets.
    pub output: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub resample: bool,
    #[serde(default)]
    pub clouds: bool,
    #[serde(default)]
    pub raster_clouds: Option<String>,
    #[serde(default)]
    pub vector_clouds: Option<String>,
    #[serde(default)]
    pub extent: Extent,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default = "default_semantic_labels")]
    pub semantic_labels: bool,
    #[serde(default)]
    pub zero_to_null: bool,
    #[serde(default)]
    pub atmospheric_correction: Option<AtmosphericCorrection>,
    /// Where corrected scenes are written; removed after the run.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Defaults to `cell_misc` inside the shared namespace.
    #[serde(default)]
    pub metadata_dir: Option<PathBuf>,
}

fn default_semantic_labels() -> bool {
    true
}

impl ImportSettings {
    pub fn new(input_dir: impl Into<PathBuf>, output: impl Into<String>) -> Self {
        Self {
            input_dir: input_dir.into(),
            layout: InputLayout::default(),
            output: output.into(),
            pattern: None,
            resample: false,
            clouds: false,
            raster_clouds: None,
            vector_clouds: None,
            extent: Extent::default(),
            region: None,
            offset: None,
            semantic_labels: true,
            zero_to_null: false,
            atmospheric_correction: None,
            scratch_dir: None,
            metadata_dir: None,
        }
    }

    pub fn cloud_output(&self) -> Option<CloudOutput> {
        match (self.clouds, &self.raster_clouds) {
            (false, _) => None,
            (true, Some(_)) => Some(CloudOutput::Raster),
            (true, None) => Some(CloudOutput::Vector),
        }
    }

    pub fn variant(&self) -> ImportVariant {
        ImportVariant::select(self.resample, self.cloud_output())
    }

    /// Name and kind of the cloud dataset, when clouds are imported.
    pub fn cloud_dataset(&self) -> Option<(String, ArtifactKind)> {
        match self.cloud_output()? {
            CloudOutput::Raster => self
                .raster_clouds
                .clone()
                .map(|name| (name, ArtifactKind::Raster)),
            CloudOutput::Vector => Some((
                self.vector_clouds
                    .clone()
                    .unwrap_or_else(|| format!("{}_clouds", self.output)),
                ArtifactKind::Vector,
            )),
        }
    }

    pub fn required_steps(&self) -> Vec<StepKind> {
        let mut kinds = Vec::new();
        if self.atmospheric_correction.is_some() {
            kinds.push(StepKind::AtmosphericCorrection);
        }
        kinds.push(StepKind::Import);
        if self.offset.is_some() {
            kinds.push(StepKind::ApplyOffset);
        }
        kinds
    }
}

/// One scene found in the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneInput {
    pub name: String,
    /// Folder handed to the import step.
    pub input: PathBuf,
    /// The scene's own file or folder.
    pub entry: PathBuf,
    /// Restricts a flat input folder to this scene.
    pub pattern_file: Option<String>,
}

/// List scenes of `dir`, sorted by entry name. Entries that cannot be a
/// scene are logged and skipped.
pub async fn discover_scenes(dir: &Path, layout: InputLayout) -> PipelineResult<Vec<SceneInput>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        match entry.file_name().into_string() {
            Ok(name) => names.push((name, is_dir)),
            Err(raw) => InputEntrySkipped {
                entry: &raw.to_string_lossy(),
                reason: "is not valid UTF-8",
            }
            .log(),
        }
    }
    names.sort();

    let mut seen = HashSet::new();
    let mut scenes = Vec::new();
    for (name, is_dir) in names {
        let entry = dir.join(&name);
        let scene = match layout {
            InputLayout::PerScene if is_dir => SceneInput {
                name: name.clone(),
                input: entry.clone(),
                entry,
                pattern_file: None,
            },
            InputLayout::PerScene => {
                InputEntrySkipped {
                    entry: &entry.display().to_string(),
                    reason: "is not a scene folder",
                }
                .log();
                continue;
            }
            InputLayout::Flat => match flat_pattern_file(&name) {
                Some(pattern_file) => SceneInput {
                    name: pattern_file.clone(),
                    input: dir.to_path_buf(),
                    entry,
                    pattern_file: Some(pattern_file),
                },
                None => {
                    InputEntrySkipped {
                        entry: &entry.display().to_string(),
                        reason: "is not in .SAFE or .zip format",
                    }
                    .log();
                    continue;
                }
            },
        };
        if !seen.insert(scene.name.clone()) {
            InputEntrySkipped {
                entry: &scene.entry.display().to_string(),
                reason: "repeats a scene already found",
            }
            .log();
            continue;
        }
        scenes.push(scene);
    }
    Ok(scenes)
}

/// `X.SAFE` -> `X`, `X.zip` and `X.SAFE.zip` -> `X`.
fn flat_pattern_file(name: &str) -> Option<String> {
    let stem = if let Some(stem) = name.strip_suffix(".SAFE") {
        stem
    } else {
        let stem = name.strip_suffix(".zip")?;
        stem.split(".SAFE").next().unwrap_or(stem)
    };
    (!stem.is_empty()).then(|| stem.to_string())
}

/// First `.SAFE` entry inside a per-scene folder, or the folder itself.
async fn safe_product(folder: &Path) -> PipelineResult<PathBuf> {
    let mut entries = tokio::fs::read_dir(folder).await?;
    let mut products = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().ends_with(".SAFE") {
            products.push(entry.path());
        }
    }
    products.sort();
    Ok(products
        .into_iter()
        .next()
        .unwrap_or_else(|| folder.to_path_buf()))
}

/// Run the import pipeline.
///
/// Scratch directories of the atmospheric correction are handed to
/// `cleanup`; the caller drains it.
pub async fn run_import(
    ctx: &PipelineContext,
    settings: &ImportSettings,
    cleanup: &CleanupRegistry,
) -> PipelineResult<RunSummary> {
    ctx.ensure_steps(&settings.required_steps()).await?;

    let shared = ctx.location.open_namespace(&ctx.shared_namespace).await?;
    let mut reconciler = ResultReconciler::new(shared.clone()).await?;
    let mut summary = RunSummary::default();

    let mut scenes = discover_scenes(&settings.input_dir, settings.layout).await?;
    let options = ctx.pool_options(scenes.len(), WorkerClamp::ClampToCpus);

    if let Some(correction) = &settings.atmospheric_correction {
        scenes = correct_scenes(
            ctx,
            settings,
            correction,
            scenes,
            &mut reconciler,
            cleanup,
            &mut summary,
        )
        .await?;
    }

    let metadata_dir = settings
        .metadata_dir
        .clone()
        .unwrap_or_else(|| shared.path().join(METADATA_SUBDIR));
    tokio::fs::create_dir_all(&metadata_dir).await?;

    let context_config = match (settings.extent, &settings.region) {
        (Extent::Region, Some(region)) => ContextConfig::default().with_region(region.clone()),
        _ => ContextConfig::default(),
    };
    let units: Vec<WorkUnit> = scenes
        .iter()
        .enumerate()
        .map(|(index, scene)| {
            let mut unit = WorkUnit::new(format!("S2_import_{}", index + 1), scene.name.clone())
                .with_input(scene.input.clone())
                .with_config(context_config.clone())
                .with_step(StepRequest::Import {
                    variant: settings.variant(),
                    options: ImportOptions {
                        pattern: settings.pattern.clone(),
                        pattern_file: scene.pattern_file.clone(),
                        metadata_dir: Some(metadata_dir.clone()),
                        zero_to_null: settings.zero_to_null,
                    },
                });
            if let Some(offset) = settings.offset {
                unit = unit.with_step(StepRequest::ApplyOffset { offset });
            }
            unit
        })
        .collect();

    let report = ctx.run_pool("import", options, units).await?;
    let reconciled = reconciler.reconcile_all(report.completed).await?;
    summary.failures.extend(report.failures);

    let mut rasters = Vec::new();
    let mut vectors = Vec::new();
    for unit in reconciled {
        summary.warnings.extend(unit.warnings);
        for artifact in unit.artifacts {
            match artifact.kind {
                ArtifactKind::Raster => rasters.push(artifact),
                ArtifactKind::Vector => vectors.push(artifact),
            }
        }
    }

    let indexer = TemporalIndexer::new().with_semantic_labels(settings.semantic_labels);
    let band_entries = indexer.entries_of_kind(&rasters, LayerKind::Band)?;
    summary.datasets.push(
        ctx.publish_dataset(
            DatasetSpec::new(settings.output.clone(), ArtifactKind::Raster, "Sentinel-2"),
            &band_entries,
        )
        .await?,
    );

    if let Some((name, kind)) = settings.cloud_dataset() {
        let cloud_entries = match kind {
            ArtifactKind::Raster => {
                TemporalIndexer::new().entries_of_kind(&rasters, LayerKind::Mask)?
            }
            ArtifactKind::Vector => TemporalIndexer::new().build_entries(&vectors)?,
        };
        summary.datasets.push(
            ctx.publish_dataset(
                DatasetSpec::new(name, kind, "Sentinel-2_sen2cor_clouds"),
                &cloud_entries,
            )
            .await?,
        );
    }

    if let Some(pattern) = &settings.pattern {
        let mut pattern =
            BandPattern::parse(pattern).map_err(|e| PipelineError::Config(e.to_string()))?;
        if settings.resample {
            pattern = pattern.resampled();
        }
        for (name, entries) in pattern.sub_datasets(&settings.output, &band_entries) {
            summary.datasets.push(
                ctx.publish_dataset(
                    DatasetSpec::new(name, ArtifactKind::Raster, "Sentinel-2"),
                    &entries,
                )
                .await?,
            );
        }
    }

    summary.artifacts = rasters.into_iter().chain(vectors).collect();
    reconciler.verify().await?;
    Ok(summary)
}

/// Run the atmospheric correction; corrected scenes come back as per-scene
/// folders. Scenes whose correction failed are dropped.
async fn correct_scenes(
    ctx: &PipelineContext,
    settings: &ImportSettings,
    correction: &AtmosphericCorrection,
    scenes: Vec<SceneInput>,
    reconciler: &mut ResultReconciler,
    cleanup: &CleanupRegistry,
    summary: &mut RunSummary,
) -> PipelineResult<Vec<SceneInput>> {
    let scratch = settings.scratch_dir.clone().unwrap_or_else(|| {
        ctx.location
            .root()
            .join(format!("sen2cor_{}", std::process::id()))
    });
    if scratch.parent() == Some(ctx.location.root()) {
        if let Some(name) = scratch.file_name().and_then(|n| n.to_str()) {
            ctx.location.reserve(name);
        }
    }
    tokio::fs::create_dir_all(&scratch).await?;
    cleanup.register_directory(&scratch);

    let mut units = Vec::with_capacity(scenes.len());
    let mut corrected = Vec::with_capacity(scenes.len());
    for (index, scene) in scenes.iter().enumerate() {
        let output_dir = scratch.join(format!("sen2cor_result_{}", index + 1));
        tokio::fs::create_dir_all(&output_dir).await?;
        let product = match settings.layout {
            InputLayout::Flat => scene.entry.clone(),
            InputLayout::PerScene => safe_product(&scene.entry).await?,
        };
        units.push(
            WorkUnit::new(format!("S2_sen2cor_{}", index + 1), scene.name.clone())
                .with_input(product)
                .with_step(StepRequest::AtmosphericCorrection {
                    sen2cor_home: correction.sen2cor_home.clone(),
                    output_dir: output_dir.clone(),
                }),
        );
        corrected.push(SceneInput {
            name: scene.name.clone(),
            input: output_dir.clone(),
            entry: output_dir,
            pattern_file: None,
        });
    }

    let options = ctx.pool_options(units.len(), WorkerClamp::ClampToCpus);
    let report = ctx.run_pool("atmospheric correction", options, units).await?;
    let failed: HashSet<String> = report.failures.iter().map(|f| f.scene.clone()).collect();
    reconciler.reconcile_all(report.completed).await?;
    summary.failures.extend(report.failures);

    Ok(corrected
        .into_iter()
        .filter(|scene| !failed.contains(&scene.name))
        .collect())
}
