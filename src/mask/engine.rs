// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::engine::{
    IsolatedWorkerPool, LayerRef, MaskRequest, PoolOptions, PoolReport, ResultReconciler,
    ShadowRequest, StepRequest, WorkUnit,
};
use crate::errors::{FailureStrategy, PipelineError, PipelineResult, UnitFailure};
use crate::mask::scene::MaskScene;
use crate::mask::state::{MaskState, SceneRecord};
use crate::observability::messages::mask::{
    AreaFilterFoundNothing, MaskComputationSkipped, MasksPatched,
};
use crate::observability::messages::StructuredLog;
use crate::temporal::RegisterEntry;
use crate::traits::{MetadataStore, ProcessingStep};
use crate::workspace::{Artifact, CleanupRegistry, Location};

pub const DEFAULT_SHADOW_THRESHOLD: u32 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct MaskSettings {
    /// Scenes with a metadata cloud percentage below this are skipped; `0`
    /// computes every scene.
    pub threshold: f64,
    pub shadows: bool,
    pub shadow_threshold: u32,
    /// Minimum cloud area in hectares kept by the area filter.
    pub min_size_clouds: Option<f64>,
    pub min_size_shadows: Option<f64>,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            shadows: false,
            shadow_threshold: DEFAULT_SHADOW_THRESHOLD,
            min_size_clouds: None,
            min_size_shadows: None,
        }
    }
}

/// Result of a mask run.
#[derive(Debug)]
pub struct MaskOutcome {
    /// Every scene in acquisition order with its terminal state and pointers.
    pub scenes: Vec<SceneRecord>,
    /// One entry per distinct final cloud artifact.
    pub cloud_entries: Vec<RegisterEntry>,
    /// One entry per distinct final shadow artifact; empty without shadows.
    pub shadow_entries: Vec<RegisterEntry>,
    pub failures: Vec<UnitFailure>,
}

impl MaskOutcome {
    pub fn scene(&self, name: &str) -> Option<&SceneRecord> {
        self.scenes.iter().find(|record| record.name() == name)
    }
}

struct MergeGroup {
    unit_id: String,
    members: Vec<usize>,
    cloud: Artifact,
    shadow: Option<Artifact>,
}

struct FilterTarget {
    unit_id: String,
    artifact: Artifact,
    mask: &'static str,
    min_size_ha: f64,
}

/// Computes per-scene cloud/shadow masks and collapses same-date masks into
/// one patched artifact.
///
/// Runs three pool passes, each drained and reconciled before the next one
/// starts: detection, date-group patching, area filtering.
pub struct MaskMergeEngine {
    location: Arc<Location>,
    step: Arc<dyn ProcessingStep>,
    metadata: Option<Arc<dyn MetadataStore>>,
    options: PoolOptions,
    settings: MaskSettings,
}

impl MaskMergeEngine {
    pub fn new(
        location: Arc<Location>,
        step: Arc<dyn ProcessingStep>,
        options: PoolOptions,
        settings: MaskSettings,
    ) -> Self {
        Self {
            location,
            step,
            metadata: None,
            options,
            settings,
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn metadata(&self) -> PipelineResult<&dyn MetadataStore> {
        self.metadata.as_deref().ok_or_else(|| {
            PipelineError::Config(
                "a cloud threshold or shadow detection needs scene metadata".to_string(),
            )
        })
    }

    /// Run every pass over `scenes`. Superseded per-scene masks are handed to
    /// `cleanup`; the caller decides when to drain it.
    pub async fn run(
        &self,
        scenes: Vec<MaskScene>,
        reconciler: &mut ResultReconciler,
        cleanup: &CleanupRegistry,
    ) -> PipelineResult<MaskOutcome> {
        if self.settings.threshold > 0.0 || self.settings.shadows {
            self.metadata()?;
        }

        let mut records: Vec<SceneRecord> = scenes
            .into_iter()
            .map(|scene| SceneRecord::new(scene, self.settings.shadows))
            .collect();
        records.sort_by(|a, b| {
            a.scene
                .acquired
                .cmp(&b.scene.acquired)
                .then_with(|| a.scene.name.cmp(&b.scene.name))
        });

        let mut failures = Vec::new();
        self.decide(&mut records).await?;
        self.detect(&mut records, reconciler, &mut failures).await?;
        self.merge(&mut records, reconciler, cleanup, &mut failures)
            .await?;
        self.filter(&records, reconciler).await?;

        if let Some(stuck) = records.iter().find(|r| !r.state.is_terminal()) {
            return Err(PipelineError::UnresolvedScene {
                scene: stuck.name().to_string(),
                state: stuck.state.to_string(),
            });
        }

        let (cloud_entries, shadow_entries) = registration_entries(&records);
        Ok(MaskOutcome {
            scenes: records,
            cloud_entries,
            shadow_entries,
            failures,
        })
    }

    async fn decide(&self, records: &mut [SceneRecord]) -> PipelineResult<()> {
        for record in records.iter_mut() {
            if self.settings.threshold > 0.0 {
                let percentage = self
                    .metadata()?
                    .cloud_percentage(&record.scene.metadata_layer)
                    .await?;
                if percentage < self.settings.threshold {
                    MaskComputationSkipped {
                        scene: record.name(),
                        cloud_percentage: percentage,
                        threshold: self.settings.threshold,
                    }
                    .log();
                    record.advance(MaskState::Skipped)?;
                    continue;
                }
            }
            record.advance(MaskState::Computed)?;
        }
        Ok(())
    }

    async fn detect(
        &self,
        records: &mut [SceneRecord],
        reconciler: &mut ResultReconciler,
        failures: &mut Vec<UnitFailure>,
    ) -> PipelineResult<()> {
        let shared = reconciler.shared().name().to_string();
        let mut units = Vec::new();
        for record in records.iter().filter(|r| r.state == MaskState::Computed) {
            let shadow = match &record.shadow {
                Some(output) => Some(ShadowRequest {
                    output: output.clone(),
                    metadata: self
                        .metadata()?
                        .document_path(&record.scene.metadata_layer),
                    threshold: self.settings.shadow_threshold,
                }),
                None => None,
            };
            let request = MaskRequest {
                bands: record.scene.mask_bands(&shared)?,
                cloud_output: record.cloud.clone(),
                shadow,
            };
            units.push(
                WorkUnit::new(record.cloud.name.clone(), record.name())
                    .with_step(StepRequest::DetectMasks(request)),
            );
        }

        let report = self.run_pool("mask detection", units).await?;
        let failed: HashSet<String> = report.failures.iter().map(|f| f.scene.clone()).collect();
        let produced: HashSet<Artifact> = reconciler
            .reconcile_all(report.completed)
            .await?
            .into_iter()
            .flat_map(|unit| unit.artifacts)
            .collect();
        failures.extend(report.failures);

        for record in records.iter_mut() {
            if failed.contains(record.name()) {
                record.advance(MaskState::Failed)?;
                continue;
            }
            let reason = if record.skipped {
                "cloud percentage below threshold"
            } else {
                "nothing detected"
            };
            let masks: Vec<Artifact> = record.masks().cloned().collect();
            for mask in masks {
                if record.skipped || !produced.contains(&mask) {
                    reconciler.publish_null(&mask, reason).await?;
                }
            }
            record.advance(MaskState::Standalone)?;
        }
        Ok(())
    }

    async fn merge(
        &self,
        records: &mut [SceneRecord],
        reconciler: &mut ResultReconciler,
        cleanup: &CleanupRegistry,
        failures: &mut Vec<UnitFailure>,
    ) -> PipelineResult<()> {
        let shared = reconciler.shared().name().to_string();
        let mut by_date: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            if record.state == MaskState::Standalone {
                by_date.entry(record.scene.date()).or_default().push(index);
            }
        }

        let mut groups = Vec::new();
        let mut units = Vec::new();
        for (date, members) in by_date {
            if members.len() < 2 {
                continue;
            }
            let stamp = date.format("%Y%m%d");
            let cloud = Artifact::raster(format!("clouds_patched_{}", stamp));
            let shadow = self
                .settings
                .shadows
                .then(|| Artifact::raster(format!("shadows_patched_{}", stamp)));

            let mut unit = WorkUnit::new(cloud.name.clone(), cloud.name.clone()).with_step(
                StepRequest::Patch {
                    inputs: members
                        .iter()
                        .map(|&i| LayerRef::qualified(records[i].cloud.name.clone(), &shared))
                        .collect(),
                    output: cloud.clone(),
                },
            );
            if let Some(shadow) = &shadow {
                unit = unit.with_step(StepRequest::Patch {
                    inputs: members
                        .iter()
                        .filter_map(|&i| records[i].shadow.as_ref())
                        .map(|s| LayerRef::qualified(s.name.clone(), &shared))
                        .collect(),
                    output: shadow.clone(),
                });
            }

            groups.push(MergeGroup {
                unit_id: unit.id.clone(),
                members,
                cloud,
                shadow,
            });
            units.push(unit);
        }
        if units.is_empty() {
            return Ok(());
        }

        let report = self.run_pool("mask patch", units).await?;
        let failed: HashSet<String> = report.failures.iter().map(|f| f.unit_id.clone()).collect();
        let produced: HashSet<Artifact> = reconciler
            .reconcile_all(report.completed)
            .await?
            .into_iter()
            .flat_map(|unit| unit.artifacts)
            .collect();
        failures.extend(report.failures);

        for group in groups {
            if failed.contains(&group.unit_id) {
                for &i in &group.members {
                    records[i].advance(MaskState::Failed)?;
                }
                continue;
            }

            for merged in std::iter::once(&group.cloud).chain(group.shadow.iter()) {
                if !produced.contains(merged) {
                    reconciler
                        .publish_null(merged, "patch produced no output")
                        .await?;
                }
            }
            MasksPatched {
                output: &group.cloud.name,
                member_count: group.members.len(),
            }
            .log();

            for &i in &group.members {
                let record = &mut records[i];
                cleanup.register_artifact(reconciler.shared(), record.cloud.clone());
                record.cloud = group.cloud.clone();
                if let (Some(own), Some(merged)) = (record.shadow.as_mut(), group.shadow.as_ref()) {
                    cleanup.register_artifact(reconciler.shared(), own.clone());
                    *own = merged.clone();
                }
                record.advance(MaskState::Merged)?;
            }
        }
        Ok(())
    }

    async fn filter(
        &self,
        records: &[SceneRecord],
        reconciler: &mut ResultReconciler,
    ) -> PipelineResult<()> {
        let shared = reconciler.shared().name().to_string();
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for record in records.iter().filter(|r| r.state != MaskState::Failed) {
            let candidates = [
                (Some(&record.cloud), self.settings.min_size_clouds, "clouds"),
                (record.shadow.as_ref(), self.settings.min_size_shadows, "shadows"),
            ];
            for (artifact, min_size, mask) in candidates {
                let (Some(artifact), Some(min_size_ha)) = (artifact, min_size) else {
                    continue;
                };
                if !seen.insert(artifact.clone()) || reconciler.is_null(artifact).await? {
                    continue;
                }
                targets.push(FilterTarget {
                    unit_id: format!("filter_{}", artifact.name),
                    artifact: artifact.clone(),
                    mask,
                    min_size_ha,
                });
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let units = targets
            .iter()
            .map(|target| {
                WorkUnit::new(target.unit_id.clone(), target.artifact.name.clone()).with_step(
                    StepRequest::FilterSmallAreas {
                        input: LayerRef::qualified(target.artifact.name.clone(), &shared),
                        output: target.artifact.clone(),
                        min_size_ha: target.min_size_ha,
                    },
                )
            })
            .collect();

        // Keeping nothing is not a failure and must not cancel sibling filters.
        let options = self
            .options
            .clone()
            .with_failure_strategy(FailureStrategy::ContinueOnError);
        let report = self.run_pool_with("area filter", units, options).await?;
        reconciler.reconcile_all(report.completed).await?;

        // A filter that keeps nothing means the image is clean.
        for failure in &report.failures {
            if let Some(target) = targets.iter().find(|t| t.unit_id == failure.unit_id) {
                AreaFilterFoundNothing {
                    artifact: &target.artifact.name,
                    mask: target.mask,
                    min_size_ha: target.min_size_ha,
                }
                .log();
                reconciler
                    .publish_null(&target.artifact, &failure.reason)
                    .await?;
            }
        }
        Ok(())
    }

    async fn run_pool(&self, label: &str, units: Vec<WorkUnit>) -> PipelineResult<PoolReport> {
        self.run_pool_with(label, units, self.options.clone()).await
    }

    async fn run_pool_with(
        &self,
        label: &str,
        units: Vec<WorkUnit>,
        options: PoolOptions,
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
}

/// One entry per distinct final artifact, timestamped with the earliest
/// member scene. Failed scenes are left out.
fn registration_entries(records: &[SceneRecord]) -> (Vec<RegisterEntry>, Vec<RegisterEntry>) {
    let mut seen = HashSet::new();
    let mut clouds = Vec::new();
    let mut shadows = Vec::new();
    for record in records.iter().filter(|r| r.state != MaskState::Failed) {
        if seen.insert(record.cloud.clone()) {
            clouds.push(RegisterEntry::new(&record.cloud, record.scene.acquired));
        }
        if let Some(shadow) = &record.shadow {
            if seen.insert(shadow.clone()) {
                shadows.push(RegisterEntry::new(shadow, record.scene.acquired));
            }
        }
    }
    (clouds, shadows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FailingStep, StubStep};
    use crate::engine::StepKind;
    use crate::errors::FailureStrategy;
    use crate::mask::scene::REQUIRED_BANDS;
    use crate::mask::JsonMetadataStore;
    use crate::workspace::Namespace;
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn options() -> PoolOptions {
        PoolOptions {
            max_concurrency: 2,
            memory_per_worker_mb: 100,
            unit_timeout: None,
            failure_strategy: FailureStrategy::ContinueOnError,
        }
    }

    async fn scene(shared: &Namespace, name: &str, day: u32, hour: u32) -> MaskScene {
        let acquired: NaiveDateTime = NaiveDate::from_ymd_opt(2021, 6, day)
            .and_then(|d| d.and_hms_opt(hour, 30, 21))
            .unwrap();
        let mut bands = BTreeMap::new();
        for band in REQUIRED_BANDS {
            let layer = format!("{}_{}_10m", name, band);
            shared.write(&Artifact::raster(&layer), b"band").await.unwrap();
            bands.insert(band.to_string(), layer);
        }
        MaskScene {
            name: name.to_string(),
            acquired,
            metadata_layer: bands["B02"].clone(),
            bands,
        }
    }

    struct Fixture {
        _dir: TempDir,
        location: Arc<Location>,
        shared: Namespace,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let location = Arc::new(Location::new(dir.path().join("location")));
        let shared = location.open_namespace("PERMANENT").await.unwrap();
        Fixture {
            _dir: dir,
            location,
            shared,
        }
    }

    #[tokio::test]
    async fn single_scene_dates_stay_standalone() {
        let f = fixture().await;
        let scenes = vec![
            scene(&f.shared, "T32UMA_20210615T103021", 15, 10).await,
            scene(&f.shared, "T32UMA_20210620T103021", 20, 10).await,
        ];
        let stub = Arc::new(StubStep::new());
        let engine = MaskMergeEngine::new(
            Arc::clone(&f.location),
            stub.clone(),
            options(),
            MaskSettings::default(),
        );
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();
        let cleanup = CleanupRegistry::new();

        let outcome = engine.run(scenes, &mut reconciler, &cleanup).await.unwrap();

        assert!(outcome
            .scenes
            .iter()
            .all(|r| r.state == MaskState::Standalone));
        assert_eq!(outcome.cloud_entries.len(), 2);
        assert!(outcome.shadow_entries.is_empty());
        assert!(stub.invocations_of(StepKind::Patch).is_empty());
        assert!(cleanup.is_empty());
        assert_eq!(f.location.active_contexts(), 0);
    }

    #[tokio::test]
    async fn clean_scene_gets_a_null_mask() {
        let f = fixture().await;
        let scenes = vec![scene(&f.shared, "T32UMA_20210615T103021", 15, 10).await];
        let stub = Arc::new(StubStep::new().with_clean_scene("T32UMA_20210615T103021"));
        let engine = MaskMergeEngine::new(
            Arc::clone(&f.location),
            stub,
            options(),
            MaskSettings::default(),
        );
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();

        let outcome = engine
            .run(scenes, &mut reconciler, &CleanupRegistry::new())
            .await
            .unwrap();

        let clouds = Artifact::raster("T32UMA_20210615T103021_clouds");
        assert!(f.shared.is_null(&clouds).await.unwrap());
        assert_eq!(outcome.cloud_entries[0].artifact, clouds.name);
    }

    #[tokio::test]
    async fn shadows_are_patched_alongside_clouds() {
        let f = fixture().await;
        let metadata_dir = f.location.root().join("cell_misc");
        let scenes = vec![
            scene(&f.shared, "T32UMA_20210615T103021", 15, 10).await,
            scene(&f.shared, "T32UNA_20210615T103024", 15, 10).await,
        ];
        let stub = Arc::new(StubStep::new());
        let engine = MaskMergeEngine::new(
            Arc::clone(&f.location),
            stub.clone(),
            options(),
            MaskSettings {
                shadows: true,
                ..MaskSettings::default()
            },
        )
        .with_metadata(Arc::new(JsonMetadataStore::new(&metadata_dir)));
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();
        let cleanup = CleanupRegistry::new();

        let outcome = engine.run(scenes, &mut reconciler, &cleanup).await.unwrap();

        assert_eq!(outcome.cloud_entries.len(), 1);
        assert_eq!(outcome.shadow_entries.len(), 1);
        assert_eq!(outcome.shadow_entries[0].artifact, "shadows_patched_20210615");
        assert_eq!(
            f.shared
                .read(&Artifact::raster("shadows_patched_20210615"))
                .await
                .unwrap(),
            b"shadowsshadows"
        );
        // two clouds and two shadows superseded
        assert_eq!(cleanup.len(), 4);
    }

    #[tokio::test]
    async fn threshold_without_metadata_is_a_configuration_error() {
        let f = fixture().await;
        let engine = MaskMergeEngine::new(
            Arc::clone(&f.location),
            Arc::new(StubStep::new()),
            options(),
            MaskSettings {
                threshold: 10.0,
                ..MaskSettings::default()
            },
        );
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();

        let result = engine
            .run(Vec::new(), &mut reconciler, &CleanupRegistry::new())
            .await;
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn failed_detection_drops_the_scene_from_registration() {
        let f = fixture().await;
        let scenes = vec![
            scene(&f.shared, "T32UMA_20210615T103021", 15, 10).await,
            scene(&f.shared, "T32UNA_20210615T103024", 15, 10).await,
        ];
        let step = Arc::new(
            FailingStep::new(Arc::new(StubStep::new())).for_scene("T32UNA_20210615T103024"),
        );
        let engine = MaskMergeEngine::new(
            Arc::clone(&f.location),
            step,
            options(),
            MaskSettings::default(),
        );
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();

        let outcome = engine
            .run(scenes, &mut reconciler, &CleanupRegistry::new())
            .await
            .unwrap();

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(
            outcome.scene("T32UNA_20210615T103024").unwrap().state,
            MaskState::Failed
        );
        // the surviving scene has no same-date partner left
        assert_eq!(
            outcome.scene("T32UMA_20210615T103021").unwrap().state,
            MaskState::Standalone
        );
        assert_eq!(outcome.cloud_entries.len(), 1);
        assert_eq!(
            outcome.cloud_entries[0].artifact,
            "T32UMA_20210615T103021_clouds"
        );
    }

    #[tokio::test]
    async fn area_filter_that_keeps_nothing_nulls_the_mask() {
        let f = fixture().await;
        let scenes = vec![
            scene(&f.shared, "T32UMA_20210615T103021", 15, 10).await,
            scene(&f.shared, "T32UMA_20210620T103021", 20, 10).await,
        ];
        let stub = Arc::new(StubStep::new().with_tiny_layer("T32UMA_20210620T103021_clouds"));
        let engine = MaskMergeEngine::new(
            Arc::clone(&f.location),
            stub.clone(),
            options(),
            MaskSettings {
                min_size_clouds: Some(1.5),
                ..MaskSettings::default()
            },
        );
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();

        let outcome = engine
            .run(scenes, &mut reconciler, &CleanupRegistry::new())
            .await
            .unwrap();

        assert!(outcome.failures.is_empty());
        assert_eq!(stub.invocations_of(StepKind::FilterSmallAreas).len(), 2);
        assert!(!f
            .shared
            .is_null(&Artifact::raster("T32UMA_20210615T103021_clouds"))
            .await
            .unwrap());
        assert!(f
            .shared
            .is_null(&Artifact::raster("T32UMA_20210620T103021_clouds"))
            .await
            .unwrap());
        assert_eq!(outcome.cloud_entries.len(), 2);
        reconciler.verify().await.unwrap();
    }

    #[tokio::test]
    async fn fail_fast_does_not_abort_when_filters_keep_nothing() {
        let f = fixture().await;
        let scenes = vec![
            scene(&f.shared, "T32UMA_20210605T103021", 5, 10).await,
            scene(&f.shared, "T32UMA_20210610T103021", 10, 10).await,
            scene(&f.shared, "T32UMA_20210615T103021", 15, 10).await,
        ];
        let stub = Arc::new(
            StubStep::new()
                .with_tiny_layer("T32UMA_20210605T103021_clouds")
                .with_tiny_layer("T32UMA_20210610T103021_clouds"),
        );
        let mut opts = options().with_failure_strategy(FailureStrategy::FailFast);
        opts.max_concurrency = 1;
        let engine = MaskMergeEngine::new(
            Arc::clone(&f.location),
            stub.clone(),
            opts,
            MaskSettings {
                min_size_clouds: Some(1.5),
                ..MaskSettings::default()
            },
        );
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();

        let outcome = engine
            .run(scenes, &mut reconciler, &CleanupRegistry::new())
            .await
            .unwrap();

        assert!(outcome.failures.is_empty());
        assert_eq!(stub.invocations_of(StepKind::FilterSmallAreas).len(), 3);
        for (name, expect_null) in [
            ("T32UMA_20210605T103021_clouds", true),
            ("T32UMA_20210610T103021_clouds", true),
            ("T32UMA_20210615T103021_clouds", false),
        ] {
            assert_eq!(
                f.shared.is_null(&Artifact::raster(name)).await.unwrap(),
                expect_null,
                "{}",
                name
            );
        }
        assert_eq!(outcome.cloud_entries.len(), 3);
        reconciler.verify().await.unwrap();
    }
}
