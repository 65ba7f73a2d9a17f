// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

use crate::engine::{LayerRef, MaskBands};
use crate::errors::{PipelineError, PipelineResult};
use crate::observability::messages::mask::NullBandSkipped;
use crate::observability::messages::StructuredLog;
use crate::temporal::{ArtifactName, LayerKind, RegisterEntry};
use crate::workspace::{Artifact, ArtifactKind, Namespace};

/// Bands cloud and shadow detection needs for every scene.
pub const REQUIRED_BANDS: [&str; 7] = ["B02", "B03", "B04", "B08", "B8A", "B11", "B12"];

/// One acquisition with its band layers, keyed by band token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskScene {
    /// `{tile}_{YYYYMMDDTHHMMSS}`
    pub name: String,
    pub acquired: NaiveDateTime,
    pub bands: BTreeMap<String, String>,
    /// Layer whose metadata document describes the scene.
    pub metadata_layer: String,
}

impl MaskScene {
    pub fn date(&self) -> NaiveDate {
        self.acquired.date()
    }

    pub fn cloud_artifact(&self) -> Artifact {
        Artifact::raster(format!("{}_clouds", self.name))
    }

    pub fn shadow_artifact(&self) -> Artifact {
        Artifact::raster(format!("{}_shadows", self.name))
    }

    fn missing_bands(&self) -> Vec<String> {
        REQUIRED_BANDS
            .iter()
            .filter(|band| !self.bands.contains_key(**band))
            .map(|band| band.to_string())
            .collect()
    }

    /// Band inputs for mask detection, qualified with the namespace that holds them.
    pub fn mask_bands(&self, namespace: &str) -> PipelineResult<MaskBands> {
        let layer = |band: &str| {
            self.bands
                .get(band)
                .map(|name| LayerRef::qualified(name.clone(), namespace))
                .ok_or_else(|| PipelineError::IncompleteScene {
                    scene: self.name.clone(),
                    missing: vec![band.to_string()],
                })
        };
        Ok(MaskBands {
            blue: layer("B02")?,
            green: layer("B03")?,
            red: layer("B04")?,
            nir: layer("B08")?,
            nir8a: layer("B8A")?,
            swir11: layer("B11")?,
            swir12: layer("B12")?,
        })
    }
}

/// Group band entries of a temporal dataset into scenes.
///
/// Layers that are null in `shared` are left out with a warning. Entries that
/// are not bands (masks) are ignored. A scene lacking any of
/// [`REQUIRED_BANDS`] fails the call. Scenes come back ordered by
/// acquisition time, then name.
pub async fn collect_scenes(
    entries: &[RegisterEntry],
    shared: &Namespace,
) -> PipelineResult<Vec<MaskScene>> {
    let mut scenes: BTreeMap<String, MaskScene> = BTreeMap::new();

    for entry in entries {
        if entry.kind != ArtifactKind::Raster || LayerKind::of(&entry.artifact) == LayerKind::Mask {
            continue;
        }
        let parsed = ArtifactName::parse(&entry.artifact)?;
        let artifact = Artifact::raster(&entry.artifact);
        if shared.is_null(&artifact).await? {
            NullBandSkipped {
                layer: &entry.artifact,
            }
            .log();
            continue;
        }

        let scene = scenes
            .entry(parsed.scene())
            .or_insert_with(|| MaskScene {
                name: parsed.scene(),
                acquired: entry.timestamp,
                bands: BTreeMap::new(),
                metadata_layer: entry.artifact.clone(),
            });
        scene
            .bands
            .insert(parsed.band().to_string(), entry.artifact.clone());
    }

    let mut collected = Vec::with_capacity(scenes.len());
    for scene in scenes.into_values() {
        let missing = scene.missing_bands();
        if !missing.is_empty() {
            return Err(PipelineError::IncompleteScene {
                scene: scene.name,
                missing,
            });
        }
        collected.push(scene);
    }
    collected.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.name.cmp(&b.name)));
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Location;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 6, day)
            .and_then(|d| d.and_hms_opt(hour, 30, 21))
            .unwrap()
    }

    async fn band_entries(shared: &Namespace, scene: &str, when: NaiveDateTime) -> Vec<RegisterEntry> {
        let mut entries = Vec::new();
        for band in REQUIRED_BANDS {
            let artifact = Artifact::raster(format!("{}_{}_10m", scene, band));
            shared.write(&artifact, b"band").await.unwrap();
            entries.push(RegisterEntry::new(&artifact, when));
        }
        entries
    }

    #[tokio::test]
    async fn scenes_are_grouped_and_ordered_by_acquisition() {
        let dir = TempDir::new().unwrap();
        let location = Location::new(dir.path());
        let shared = location.open_namespace("PERMANENT").await.unwrap();

        let mut entries = band_entries(&shared, "T32UNA_20210616T103021", at(16, 10)).await;
        entries.extend(band_entries(&shared, "T32UMA_20210615T103021", at(15, 10)).await);

        let scenes = collect_scenes(&entries, &shared).await.unwrap();

        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].name, "T32UMA_20210615T103021");
        assert_eq!(scenes[0].bands.len(), 7);
        assert_eq!(scenes[0].bands["B8A"], "T32UMA_20210615T103021_B8A_10m");
        assert_eq!(
            scenes[0].cloud_artifact(),
            Artifact::raster("T32UMA_20210615T103021_clouds")
        );
        let bands = scenes[0].mask_bands("PERMANENT").unwrap();
        assert_eq!(bands.swir12.to_string(), "T32UMA_20210615T103021_B12_10m@PERMANENT");
    }

    #[tokio::test]
    async fn null_band_makes_the_scene_incomplete() {
        let dir = TempDir::new().unwrap();
        let location = Location::new(dir.path());
        let shared = location.open_namespace("PERMANENT").await.unwrap();

        let entries = band_entries(&shared, "T32UMA_20210615T103021", at(15, 10)).await;
        shared
            .write_null(&Artifact::raster("T32UMA_20210615T103021_B11_10m"))
            .await
            .unwrap();

        let result = collect_scenes(&entries, &shared).await;
        assert!(matches!(
            result,
            Err(PipelineError::IncompleteScene { ref missing, .. }) if missing == &vec!["B11".to_string()]
        ));
    }

    #[tokio::test]
    async fn mask_entries_are_ignored() {
        let dir = TempDir::new().unwrap();
        let location = Location::new(dir.path());
        let shared = location.open_namespace("PERMANENT").await.unwrap();

        let mut entries = band_entries(&shared, "T32UMA_20210615T103021", at(15, 10)).await;
        entries.push(RegisterEntry::new(
            &Artifact::vector("T32UMA_20210615T103021_CLOUDS"),
            at(15, 10),
        ));
        entries.push(RegisterEntry::new(
            &Artifact::raster("clouds_patched_20210615"),
            at(15, 10),
        ));

        let scenes = collect_scenes(&entries, &shared).await.unwrap();
        assert_eq!(scenes.len(), 1);
    }
}
