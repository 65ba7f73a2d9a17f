// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for reconciling worker contexts into the shared namespace.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Artifacts of one worker context were copied into the shared namespace.
///
/// # Log Level
/// `debug!` - Detailed diagnostic information
pub struct ArtifactsReconciled<'a> {
    pub context: &'a str,
    pub shared: &'a str,
    pub artifact_count: usize,
}

impl Display for ArtifactsReconciled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Copied {} artifact(s) from <{}> into <{}>",
            self.artifact_count, self.context, self.shared
        )
    }
}

impl StructuredLog for ArtifactsReconciled<'_> {
    fn log(&self) {
        tracing::debug!(
            context = self.context,
            shared = self.shared,
            artifact_count = self.artifact_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("reconcile", span_name = name, context = self.context)
    }
}

/// The shared namespace no longer matches what the caller left behind.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use scenestack::observability::messages::reconcile::IsolationViolated;
///
/// let msg = IsolationViolated {
///     namespace: "PERMANENT",
///     detail: "unexpected raster 'foo'",
/// };
///
/// tracing::error!("{}", msg);
/// ```
pub struct IsolationViolated<'a> {
    pub namespace: &'a str,
    pub detail: &'a str,
}

impl Display for IsolationViolated<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Shared namespace <{}> was changed by a worker: {}",
            self.namespace, self.detail
        )
    }
}

impl StructuredLog for IsolationViolated<'_> {
    fn log(&self) {
        tracing::error!(namespace = self.namespace, detail = self.detail, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!("isolation_violated", span_name = name, namespace = self.namespace)
    }
}

/// An empty (null) layer was written in place of a missing output.
///
/// # Log Level
/// `info!` - Important operational event
pub struct NullArtifactPublished<'a> {
    pub artifact: &'a str,
    pub reason: &'a str,
}

impl Display for NullArtifactPublished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Writing empty layer <{}>: {}", self.artifact, self.reason)
    }
}

impl StructuredLog for NullArtifactPublished<'_> {
    fn log(&self) {
        tracing::info!(artifact = self.artifact, reason = self.reason, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("null_artifact", span_name = name, artifact = self.artifact)
    }
}
