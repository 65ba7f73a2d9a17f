// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::path::Path;

use crate::engine::{LayerRef, StepKind, StepRequest};
use crate::errors::StepError;
use crate::workspace::{Artifact, Location, Namespace, WorkerContext};

/// Everything one step invocation may touch.
///
/// The worker context is passed explicitly; a step writes only into
/// `context.namespace()` and may read other namespaces through `location`.
pub struct StepInvocation<'a> {
    pub request: &'a StepRequest,
    pub scene: &'a str,
    pub input: Option<&'a Path>,
    pub context: &'a WorkerContext,
    pub location: &'a Location,
}

impl StepInvocation<'_> {
    /// Namespace a layer reference points at; unqualified names live in the
    /// unit's own context.
    pub fn resolve(&self, layer: &LayerRef) -> Namespace {
        match &layer.namespace {
            Some(name) => self.location.namespace(name),
            None => self.context.namespace().clone(),
        }
    }
}

/// What a successful invocation left behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub produced: Vec<Artifact>,
    /// Non-fatal diagnostics (e.g. scene does not overlap the region).
    pub warnings: Vec<String>,
}

impl StepOutcome {
    pub fn produced(produced: Vec<Artifact>) -> Self {
        Self {
            produced,
            warnings: Vec::new(),
        }
    }
}

/// Opaque external processing step.
#[async_trait]
pub trait ProcessingStep: Send + Sync {
    async fn invoke(&self, invocation: StepInvocation<'_>) -> Result<StepOutcome, StepError>;

    /// Check up front that the step can run requests of `kind`.
    async fn ensure_available(&self, _kind: StepKind) -> Result<(), StepError> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}
