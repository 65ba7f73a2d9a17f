// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for temporal dataset creation, registration and input discovery.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A temporal dataset was created and filled.
///
/// # Log Level
/// `info!` - User-visible result
///
/// # Example
/// ```
/// use scenestack::observability::messages::temporal::DatasetCreated;
///
/// let msg = DatasetCreated { dataset: "s2_B04", kind: "raster", entry_count: 12 };
/// assert_eq!(msg.to_string(), "<s2_B04> is created (raster, 12 entries)");
/// ```
pub struct DatasetCreated<'a> {
    pub dataset: &'a str,
    pub kind: &'a str,
    pub entry_count: usize,
}

impl Display for DatasetCreated<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{}> is created ({}, {} entries)",
            self.dataset, self.kind, self.entry_count
        )
    }
}

impl StructuredLog for DatasetCreated<'_> {
    fn log(&self) {
        tracing::info!(
            dataset = self.dataset,
            kind = self.kind,
            entry_count = self.entry_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("dataset", span_name = name, dataset = self.dataset)
    }
}

/// An entry of the input directory does not look like a scene and is skipped.
///
/// # Log Level
/// `warn!` - Potential issue
pub struct InputEntrySkipped<'a> {
    pub entry: &'a str,
    pub reason: &'a str,
}

impl Display for InputEntrySkipped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} {}, skipping", self.entry, self.reason)
    }
}

impl StructuredLog for InputEntrySkipped<'_> {
    fn log(&self) {
        tracing::warn!(entry = self.entry, reason = self.reason, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("input_skipped", span_name = name, entry = self.entry)
    }
}
