// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

use crate::workspace::{Artifact, ContextConfig};

/// Reference to a layer, optionally qualified by the namespace holding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerRef {
    pub name: String,
    pub namespace: Option<String>,
}

impl LayerRef {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn qualified(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}

impl fmt::Display for LayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}@{}", self.name, namespace),
            None => f.write_str(&self.name),
        }
    }
}

/// Form in which an import step writes the scene's cloud mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudOutput {
    #[default]
    Vector,
    Raster,
}

impl fmt::Display for CloudOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudOutput::Vector => f.write_str("vector"),
            CloudOutput::Raster => f.write_str("raster"),
        }
    }
}

/// Exactly one flavour of scene import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportVariant {
    Plain,
    Resampled,
    CloudMask(CloudOutput),
    ResampledCloudMask(CloudOutput),
}

impl ImportVariant {
    pub fn select(resample: bool, clouds: Option<CloudOutput>) -> Self {
        match (resample, clouds) {
            (false, None) => ImportVariant::Plain,
            (true, None) => ImportVariant::Resampled,
            (false, Some(output)) => ImportVariant::CloudMask(output),
            (true, Some(output)) => ImportVariant::ResampledCloudMask(output),
        }
    }

    pub fn resamples(self) -> bool {
        matches!(
            self,
            ImportVariant::Resampled | ImportVariant::ResampledCloudMask(_)
        )
    }

    pub fn cloud_output(self) -> Option<CloudOutput> {
        match self {
            ImportVariant::CloudMask(output) | ImportVariant::ResampledCloudMask(output) => {
                Some(output)
            }
            ImportVariant::Plain | ImportVariant::Resampled => None,
        }
    }
}

/// Options shared by every import variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Band name pattern passed through to the importer.
    pub pattern: Option<String>,
    /// Scene file stem inside a flat input directory.
    pub pattern_file: Option<String>,
    /// Directory receiving per-layer metadata documents.
    pub metadata_dir: Option<PathBuf>,
    /// Turn zero cells into null cells after import.
    pub zero_to_null: bool,
}

/// The seven bands cloud and shadow detection reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskBands {
    pub blue: LayerRef,
    pub green: LayerRef,
    pub red: LayerRef,
    pub nir: LayerRef,
    pub nir8a: LayerRef,
    pub swir11: LayerRef,
    pub swir12: LayerRef,
}

impl MaskBands {
    /// `(role, layer)` pairs in a fixed order.
    pub fn roles(&self) -> [(&'static str, &LayerRef); 7] {
        [
            ("blue", &self.blue),
            ("green", &self.green),
            ("red", &self.red),
            ("nir", &self.nir),
            ("nir8a", &self.nir8a),
            ("swir11", &self.swir11),
            ("swir12", &self.swir12),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowRequest {
    pub output: Artifact,
    pub metadata: PathBuf,
    pub threshold: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaskRequest {
    pub bands: MaskBands,
    pub cloud_output: Artifact,
    pub shadow: Option<ShadowRequest>,
}

/// One external processing step to run inside a worker context.
#[derive(Debug, Clone, PartialEq)]
pub enum StepRequest {
    AtmosphericCorrection {
        sen2cor_home: PathBuf,
        output_dir: PathBuf,
    },
    Import {
        variant: ImportVariant,
        options: ImportOptions,
    },
    /// Add a constant to every band raster, clipping at zero.
    ApplyOffset { offset: i64 },
    DetectMasks(MaskRequest),
    /// Spatially combine several layers into one.
    Patch {
        inputs: Vec<LayerRef>,
        output: Artifact,
    },
    /// Keep only regions larger than `min_size_ha`.
    FilterSmallAreas {
        input: LayerRef,
        output: Artifact,
        min_size_ha: f64,
    },
}

impl StepRequest {
    pub fn kind(&self) -> StepKind {
        match self {
            StepRequest::AtmosphericCorrection { .. } => StepKind::AtmosphericCorrection,
            StepRequest::Import { .. } => StepKind::Import,
            StepRequest::ApplyOffset { .. } => StepKind::ApplyOffset,
            StepRequest::DetectMasks(_) => StepKind::DetectMasks,
            StepRequest::Patch { .. } => StepKind::Patch,
            StepRequest::FilterSmallAreas { .. } => StepKind::FilterSmallAreas,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
    AtmosphericCorrection,
    Import,
    ApplyOffset,
    DetectMasks,
    Patch,
    FilterSmallAreas,
}

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::AtmosphericCorrection,
        StepKind::Import,
        StepKind::ApplyOffset,
        StepKind::DetectMasks,
        StepKind::Patch,
        StepKind::FilterSmallAreas,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::AtmosphericCorrection => "atmospheric_correction",
            StepKind::Import => "import",
            StepKind::ApplyOffset => "offset",
            StepKind::DetectMasks => "mask_detection",
            StepKind::Patch => "patch",
            StepKind::FilterSmallAreas => "area_filter",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scene (or date group) and the steps it needs.
///
/// `id` doubles as the name of the worker context the unit runs in;
/// `assigned_worker` is filled in by the pool at dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub id: String,
    pub scene: String,
    pub input: Option<PathBuf>,
    pub steps: Vec<StepRequest>,
    pub config: ContextConfig,
    pub assigned_worker: Option<String>,
}

impl WorkUnit {
    pub fn new(id: impl Into<String>, scene: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scene: scene.into(),
            input: None,
            steps: Vec::new(),
            config: ContextConfig::default(),
            assigned_worker: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_step(mut self, step: StepRequest) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_follows_the_flags() {
        assert_eq!(ImportVariant::select(false, None), ImportVariant::Plain);
        assert_eq!(ImportVariant::select(true, None), ImportVariant::Resampled);
        let variant = ImportVariant::select(true, Some(CloudOutput::Raster));
        assert_eq!(variant, ImportVariant::ResampledCloudMask(CloudOutput::Raster));
        assert!(variant.resamples());
        assert_eq!(variant.cloud_output(), Some(CloudOutput::Raster));
    }

    #[test]
    fn layer_ref_displays_qualified_name() {
        assert_eq!(
            LayerRef::qualified("T32UMA_20210615T103021_B04", "PERMANENT").to_string(),
            "T32UMA_20210615T103021_B04@PERMANENT"
        );
        assert_eq!(LayerRef::local("clouds").to_string(), "clouds");
    }

    #[test]
    fn request_reports_its_kind() {
        let step = StepRequest::ApplyOffset { offset: -1000 };
        assert_eq!(step.kind(), StepKind::ApplyOffset);
        assert_eq!(step.kind().to_string(), "offset");
    }
}
