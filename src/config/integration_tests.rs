#[cfg(test)]
mod integration_tests {
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::backends::StubStep;
    use crate::budget::HostCapacity;
    use crate::config::{load_and_validate_config, RuntimeBuilder};
    use crate::engine::StepKind;
    use crate::errors::ConfigError;
    use crate::mask::REQUIRED_BANDS;
    use crate::temporal::MemoryTemporalStore;
    use crate::traits::TemporalStore;
    use crate::workspace::{Artifact, CleanupRegistry};

    fn write_config(dir: &Path, file: &str, pipeline: &str) -> std::path::PathBuf {
        let yaml = format!(
            "location: {root}/location\n\
             shared_namespace: sentinel\n\
             store: {root}/datasets\n\
             executor_options:\n  max_concurrency: 2\n  memory_mb: 100\n\
             pipeline:\n{pipeline}",
            root = dir.display(),
            pipeline = pipeline,
        );
        let path = dir.join(file);
        std::fs::write(&path, yaml).unwrap();
        path
    }

    fn scene_layers(scene: &str) -> Vec<Artifact> {
        REQUIRED_BANDS
            .iter()
            .map(|band| Artifact::raster(format!("{}_{}_10m", scene, band)))
            .collect()
    }

    /// Import two tiles acquired on the same day, then compute their cloud
    /// masks from the imported dataset.
    #[tokio::test]
    async fn test_import_then_mask_from_yaml() {
        let dir = TempDir::new().unwrap();
        let input_dir = dir.path().join("input");
        for scene in ["S2A_MSIL1C_T32UMA", "S2A_MSIL1C_T32UNA"] {
            std::fs::create_dir_all(input_dir.join(scene)).unwrap();
        }

        let import_path = write_config(
            dir.path(),
            "import.yaml",
            &format!(
                "  kind: import\n  input_dir: {}\n  layout: per_scene\n  output: s2\n",
                input_dir.display()
            ),
        );
        let mask_path = write_config(
            dir.path(),
            "mask.yaml",
            "  kind: mask\n  input: s2\n  output_clouds: s2_clouds\n",
        );

        let stub = Arc::new(
            StubStep::new()
                .with_import("S2A_MSIL1C_T32UMA", scene_layers("T32UMA_20210615T103021"))
                .with_import("S2A_MSIL1C_T32UNA", scene_layers("T32UNA_20210615T103024")),
        );
        let store = Arc::new(MemoryTemporalStore::new());

        let import = RuntimeBuilder::new(load_and_validate_config(&import_path).unwrap())
            .with_step(stub.clone())
            .with_store(store.clone())
            .with_host(HostCapacity::unknown())
            .build();
        assert_eq!(import.pipeline().name(), "import");

        let cleanup = CleanupRegistry::new();
        let summary = import.run(&cleanup).await.unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.datasets[0].name, "s2");
        assert_eq!(summary.datasets[0].entries, 14);
        assert_eq!(stub.invocations_of(StepKind::Import).len(), 2);

        let mask = RuntimeBuilder::new(load_and_validate_config(&mask_path).unwrap())
            .with_step(stub.clone())
            .with_store(store.clone())
            .with_host(HostCapacity::unknown())
            .build();
        let summary = mask.run(&cleanup).await.unwrap();

        assert!(summary.is_success());
        let clouds = store.list("s2_clouds").await.unwrap();
        assert_eq!(clouds.len(), 1);
        assert_eq!(clouds[0].artifact, "clouds_patched_20210615");
        assert_eq!(stub.invocations_of(StepKind::Patch).len(), 1);

        // Per-scene masks replaced by the patch are gone once cleanup drains.
        let shared = mask.context().location.namespace("sentinel");
        let superseded = Artifact::raster("T32UMA_20210615T103021_clouds");
        assert!(shared.contains(&superseded).await);
        cleanup.drain().await.unwrap();
        assert!(!shared.contains(&superseded).await);
        assert!(
            shared
                .contains(&Artifact::raster("clouds_patched_20210615"))
                .await
        );
    }

    #[test]
    fn test_invalid_config_reports_every_rule() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            "bad.yaml",
            "  kind: mask\n  input: s2\n  output_clouds: s2_clouds\n  threshold: 150\n  min_size_clouds: -1\n",
        );

        match load_and_validate_config(&path) {
            Err(ConfigError::Invalid(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation errors, got {:?}", other.map(|c| c.pipeline)),
        }
    }

    #[test]
    fn test_pipeline_kind_is_required() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "untagged.yaml", "  input: s2\n");
        assert!(matches!(
            load_and_validate_config(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
