//! Pool, reconciler and mask engine working together on a real location.

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::backends::{FailingStep, StubStep};
    use crate::engine::{
        ImportOptions, ImportVariant, IsolatedWorkerPool, PoolOptions, ResultReconciler, StepKind,
        StepRequest, WorkUnit,
    };
    use crate::errors::FailureStrategy;
    use crate::mask::{
        collect_scenes, JsonMetadataStore, MaskMergeEngine, MaskSettings, MaskState,
        REQUIRED_BANDS,
    };
    use crate::temporal::RegisterEntry;
    use crate::workspace::{Artifact, CleanupRegistry, Location, Namespace};

    fn options(max_concurrency: usize) -> PoolOptions {
        PoolOptions {
            max_concurrency,
            memory_per_worker_mb: 100,
            unit_timeout: None,
            failure_strategy: FailureStrategy::ContinueOnError,
        }
    }

    fn import_unit(k: usize) -> WorkUnit {
        WorkUnit::new(format!("S2_import_{}", k), format!("scene_{}", k)).with_step(
            StepRequest::Import {
                variant: ImportVariant::Plain,
                options: ImportOptions::default(),
            },
        )
    }

    fn stub_with_scenes(n: usize) -> StubStep {
        (1..=n).fold(StubStep::new(), |stub, k| {
            stub.with_import(
                format!("scene_{}", k),
                vec![Artifact::raster(format!(
                    "T32UMA_202106{:02}T103021_B04_10m",
                    k
                ))],
            )
        })
    }

    fn acquired(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 6, day)
            .and_then(|d| d.and_hms_opt(hour, 30, 21))
            .unwrap()
    }

    /// Write every required band of `scene` into `shared` and return their entries.
    async fn band_entries(shared: &Namespace, scene: &str, when: NaiveDateTime) -> Vec<RegisterEntry> {
        let mut entries = Vec::new();
        for band in REQUIRED_BANDS {
            let layer = Artifact::raster(format!("{}_{}_10m", scene, band));
            shared.write(&layer, b"band").await.unwrap();
            entries.push(RegisterEntry::new(&layer, when));
        }
        entries
    }

    struct Fixture {
        _dir: TempDir,
        location: Arc<Location>,
        shared: Namespace,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let location = Arc::new(Location::new(dir.path().join("location")));
        let shared = location.open_namespace("sentinel").await.unwrap();
        Fixture {
            _dir: dir,
            location,
            shared,
        }
    }

    #[tokio::test]
    async fn pool_never_exceeds_its_concurrency() {
        let f = fixture().await;
        let stub = Arc::new(stub_with_scenes(8).with_delay(Duration::from_millis(20)));
        let units = (1..=8).map(import_unit).collect();

        let report = IsolatedWorkerPool::run(
            "import",
            Arc::clone(&f.location),
            stub.clone(),
            options(3),
            units,
        )
        .await
        .unwrap();

        assert_eq!(report.completed.len(), 8);
        assert!(report.peak_active <= 3);
        assert!(stub.peak_in_flight() <= 3);
        assert!(stub.peak_in_flight() >= 2);
    }

    #[tokio::test]
    async fn one_failing_unit_leaves_the_others_intact() {
        let f = fixture().await;
        let step = Arc::new(FailingStep::new(Arc::new(stub_with_scenes(5))).for_scene("scene_3"));
        let units = (1..=5).map(import_unit).collect();

        let report = IsolatedWorkerPool::run("import", Arc::clone(&f.location), step, options(2), units)
            .await
            .unwrap();

        assert_eq!(report.completed.len(), 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].unit_id, "S2_import_3");
        assert_eq!(report.failures[0].step, Some(StepKind::Import));

        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();
        reconciler.reconcile_all(report.completed).await.unwrap();
        reconciler.verify().await.unwrap();

        let artifacts = f.shared.list_all().await.unwrap();
        assert_eq!(artifacts.len(), 4);
        assert!(!artifacts.contains(&Artifact::raster("T32UMA_20210603T103021_B04_10m")));
        assert!(!artifacts.contains(&Artifact::raster("partial_output")));
        assert_eq!(f.location.active_contexts(), 0);
    }

    #[tokio::test]
    async fn reconciling_the_same_outputs_twice_changes_nothing() {
        let f = fixture().await;
        let stub = Arc::new(stub_with_scenes(2));
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();

        let first = IsolatedWorkerPool::run(
            "import",
            Arc::clone(&f.location),
            stub.clone(),
            options(2),
            vec![import_unit(1), import_unit(2)],
        )
        .await
        .unwrap();
        reconciler.reconcile_all(first.completed).await.unwrap();
        let after_first = f.shared.snapshot().await.unwrap();

        let second = IsolatedWorkerPool::run(
            "import",
            Arc::clone(&f.location),
            stub,
            options(2),
            vec![import_unit(1), import_unit(2)],
        )
        .await
        .unwrap();
        reconciler.reconcile_all(second.completed).await.unwrap();

        assert_eq!(f.shared.snapshot().await.unwrap(), after_first);
        reconciler.verify().await.unwrap();
    }

    #[tokio::test]
    async fn three_scenes_on_one_date_merge_into_one_entry() {
        let f = fixture().await;
        let mut entries = Vec::new();
        for (tile, hour) in [("T32UMA", 10), ("T32UNA", 10), ("T32UPA", 11)] {
            let scene = format!("{}_20210615T{:02}3021", tile, hour);
            entries.extend(band_entries(&f.shared, &scene, acquired(15, hour)).await);
        }
        let scenes = collect_scenes(&entries, &f.shared).await.unwrap();
        assert_eq!(scenes.len(), 3);

        let stub = Arc::new(StubStep::new());
        let engine = MaskMergeEngine::new(
            Arc::clone(&f.location),
            stub.clone(),
            options(2),
            MaskSettings::default(),
        );
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();
        let cleanup = CleanupRegistry::new();

        let outcome = engine.run(scenes, &mut reconciler, &cleanup).await.unwrap();

        assert_eq!(outcome.cloud_entries.len(), 1);
        assert_eq!(outcome.cloud_entries[0].artifact, "clouds_patched_20210615");
        assert_eq!(outcome.cloud_entries[0].timestamp, acquired(15, 10));
        assert!(outcome.scenes.iter().all(|record| {
            record.state == MaskState::Merged && record.cloud.name == "clouds_patched_20210615"
        }));
        assert_eq!(stub.invocations_of(StepKind::DetectMasks).len(), 3);
        assert_eq!(stub.invocations_of(StepKind::Patch).len(), 1);
        assert_eq!(
            f.shared
                .read(&Artifact::raster("clouds_patched_20210615"))
                .await
                .unwrap(),
            b"cloudscloudsclouds"
        );

        // The three per-scene masks are superseded.
        assert_eq!(cleanup.len(), 3);
        cleanup.drain().await.unwrap();
        let masks: Vec<_> = f
            .shared
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.name.ends_with("_clouds"))
            .collect();
        assert!(masks.is_empty());
    }

    #[tokio::test]
    async fn scene_below_threshold_is_never_detected() {
        let f = fixture().await;
        let scene = "T32UMA_20210615T103021";
        let entries = band_entries(&f.shared, scene, acquired(15, 10)).await;

        let metadata_dir = f.location.root().join("cell_misc");
        let document = metadata_dir.join(format!("{}_B02_10m", scene));
        tokio::fs::create_dir_all(&document).await.unwrap();
        tokio::fs::write(
            document.join("description.json"),
            r#"{"CLOUDY_PIXEL_PERCENTAGE": "2.5"}"#,
        )
        .await
        .unwrap();

        let stub = Arc::new(StubStep::new());
        let engine = MaskMergeEngine::new(
            Arc::clone(&f.location),
            stub.clone(),
            options(2),
            MaskSettings {
                threshold: 10.0,
                ..MaskSettings::default()
            },
        )
        .with_metadata(Arc::new(JsonMetadataStore::new(&metadata_dir)));
        let mut reconciler = ResultReconciler::new(f.shared.clone()).await.unwrap();

        let scenes = collect_scenes(&entries, &f.shared).await.unwrap();
        let outcome = engine
            .run(scenes, &mut reconciler, &CleanupRegistry::new())
            .await
            .unwrap();

        assert!(stub.invocations_of(StepKind::DetectMasks).is_empty());
        let record = outcome.scene(scene).unwrap();
        assert!(record.skipped);
        assert_eq!(record.state, MaskState::Standalone);
        assert!(f.shared.is_null(&record.cloud).await.unwrap());
        assert_eq!(outcome.cloud_entries.len(), 1);
        assert!(outcome.failures.is_empty());
    }
}
