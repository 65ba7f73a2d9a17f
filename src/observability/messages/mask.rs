// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for mask computation decisions, merges and area filtering.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A scene's metadata cloud percentage is below the threshold; no masks are computed.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use scenestack::observability::messages::mask::MaskComputationSkipped;
///
/// let msg = MaskComputationSkipped {
///     scene: "T32UMA_20210615T103021",
///     cloud_percentage: 2.5,
///     threshold: 10.0,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct MaskComputationSkipped<'a> {
    pub scene: &'a str,
    pub cloud_percentage: f64,
    pub threshold: f64,
}

impl Display for MaskComputationSkipped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Scene {} has {}% cloudy pixels (threshold {}%); mask computation skipped",
            self.scene, self.cloud_percentage, self.threshold
        )
    }
}

impl StructuredLog for MaskComputationSkipped<'_> {
    fn log(&self) {
        tracing::info!(
            scene = self.scene,
            cloud_percentage = self.cloud_percentage,
            threshold = self.threshold,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("mask_skipped", span_name = name, scene = self.scene)
    }
}

/// A band layer holds only null cells in the current extent and is left out.
///
/// # Log Level
/// `warn!` - Potential issue
pub struct NullBandSkipped<'a> {
    pub layer: &'a str,
}

impl Display for NullBandSkipped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Raster {} only consists of null cells; cloud/shadow detection is skipped for it",
            self.layer
        )
    }
}

impl StructuredLog for NullBandSkipped<'_> {
    fn log(&self) {
        tracing::warn!(layer = self.layer, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("null_band", span_name = name, layer = self.layer)
    }
}

/// Same-date masks were patched into one artifact.
///
/// # Log Level
/// `info!` - Important operational event
pub struct MasksPatched<'a> {
    pub output: &'a str,
    pub member_count: usize,
}

impl Display for MasksPatched<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Patched {} same-date masks into <{}>",
            self.member_count, self.output
        )
    }
}

impl StructuredLog for MasksPatched<'_> {
    fn log(&self) {
        tracing::info!(
            output = self.output,
            member_count = self.member_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("masks_patched", span_name = name, output = self.output)
    }
}

/// The area filter kept nothing; the mask is considered clean.
///
/// # Log Level
/// `info!` - Important operational event
pub struct AreaFilterFoundNothing<'a> {
    pub artifact: &'a str,
    pub mask: &'a str,
    pub min_size_ha: f64,
}

impl Display for AreaFilterFoundNothing<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "No {} larger than {} ha detected in <{}>; image is considered {}-free",
            self.mask, self.min_size_ha, self.artifact, self.mask
        )
    }
}

impl StructuredLog for AreaFilterFoundNothing<'_> {
    fn log(&self) {
        tracing::info!(
            artifact = self.artifact,
            mask = self.mask,
            min_size_ha = self.min_size_ha,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("area_filter_empty", span_name = name, artifact = self.artifact)
    }
}
