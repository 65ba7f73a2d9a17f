// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{StepKind, StepRequest};
use crate::errors::StepError;
use crate::traits::{ProcessingStep, StepInvocation, StepOutcome};
use crate::workspace::Artifact;

/// In-process step for tests and dry runs.
///
/// Imports write the layers configured for the unit's scene (a scene with no
/// configured layers behaves like one outside the region: nothing is written
/// and a warning is returned). Mask detection writes non-empty masks unless
/// the scene is marked clean; patches concatenate their non-null inputs; the
/// area filter rejects inputs that are null or marked as too small.
#[derive(Default)]
pub struct StubStep {
    imports: HashMap<String, Vec<Artifact>>,
    clean_scenes: HashSet<String>,
    tiny_layers: HashSet<String>,
    delay: Option<Duration>,
    invocations: Mutex<Vec<(StepKind, String)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubStep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_import(mut self, scene: impl Into<String>, layers: Vec<Artifact>) -> Self {
        self.imports.insert(scene.into(), layers);
        self
    }

    /// Mask detection for `scene` finds nothing.
    pub fn with_clean_scene(mut self, scene: impl Into<String>) -> Self {
        self.clean_scenes.insert(scene.into());
        self
    }

    /// The area filter finds nothing large enough in `layer`.
    pub fn with_tiny_layer(mut self, layer: impl Into<String>) -> Self {
        self.tiny_layers.insert(layer.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(kind, context id)` of every invocation so far.
    pub fn invocations(&self) -> Vec<(StepKind, String)> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn invocations_of(&self, kind: StepKind) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, context)| context)
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn run(&self, invocation: &StepInvocation<'_>) -> Result<StepOutcome, StepError> {
        let namespace = invocation.context.namespace();
        match invocation.request {
            StepRequest::AtmosphericCorrection { output_dir, .. } => {
                tokio::fs::create_dir_all(output_dir).await?;
                Ok(StepOutcome::default())
            }
            StepRequest::Import { .. } => match self.imports.get(invocation.scene) {
                Some(layers) => {
                    for layer in layers {
                        namespace.write(layer, invocation.scene.as_bytes()).await?;
                    }
                    Ok(StepOutcome::produced(layers.clone()))
                }
                None => Ok(StepOutcome {
                    produced: Vec::new(),
                    warnings: vec![format!(
                        "Input raster <{}> does not overlap current computational region",
                        invocation.scene
                    )],
                }),
            },
            StepRequest::ApplyOffset { .. } => Ok(StepOutcome::default()),
            StepRequest::DetectMasks(mask) => {
                for (role, band) in mask.bands.roles() {
                    let source = invocation.resolve(band);
                    if !source.contains(&Artifact::raster(&band.name)).await {
                        return Err(StepError::Rejected(format!(
                            "{} band <{}> not found",
                            role, band
                        )));
                    }
                }
                if self.clean_scenes.contains(invocation.scene) {
                    return Ok(StepOutcome::default());
                }
                let mut produced = vec![mask.cloud_output.clone()];
                namespace.write(&mask.cloud_output, b"clouds").await?;
                if let Some(shadow) = &mask.shadow {
                    namespace.write(&shadow.output, b"shadows").await?;
                    produced.push(shadow.output.clone());
                }
                Ok(StepOutcome::produced(produced))
            }
            StepRequest::Patch { inputs, output } => {
                let mut merged = Vec::new();
                for input in inputs {
                    let source = invocation.resolve(input);
                    let contents = source
                        .read(&Artifact {
                            kind: output.kind,
                            name: input.name.clone(),
                        })
                        .await?;
                    merged.extend_from_slice(&contents);
                }
                namespace.write(output, &merged).await?;
                Ok(StepOutcome::produced(vec![output.clone()]))
            }
            StepRequest::FilterSmallAreas { input, output, .. } => {
                let source = invocation.resolve(input);
                let contents = source
                    .read(&Artifact {
                        kind: output.kind,
                        name: input.name.clone(),
                    })
                    .await?;
                if contents.is_empty() || self.tiny_layers.contains(&input.name) {
                    return Err(StepError::Rejected(format!(
                        "no areas left in <{}>",
                        input
                    )));
                }
                namespace.write(output, &contents).await?;
                Ok(StepOutcome::produced(vec![output.clone()]))
            }
        }
    }
}

#[async_trait]
impl ProcessingStep for StubStep {
    async fn invoke(&self, invocation: StepInvocation<'_>) -> Result<StepOutcome, StepError> {
        if let Ok(mut calls) = self.invocations.lock() {
            calls.push((
                invocation.request.kind(),
                invocation.context.id().to_string(),
            ));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.run(&invocation).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// A step that fails for selected scenes (every scene when none are selected)
/// and delegates to `inner` otherwise.
pub struct FailingStep {
    inner: Arc<dyn ProcessingStep>,
    scenes: HashSet<String>,
}

impl FailingStep {
    pub fn new(inner: Arc<dyn ProcessingStep>) -> Self {
        Self {
            inner,
            scenes: HashSet::new(),
        }
    }

    pub fn for_scene(mut self, scene: impl Into<String>) -> Self {
        self.scenes.insert(scene.into());
        self
    }
}

#[async_trait]
impl ProcessingStep for FailingStep {
    async fn invoke(&self, invocation: StepInvocation<'_>) -> Result<StepOutcome, StepError> {
        if self.scenes.is_empty() || self.scenes.contains(invocation.scene) {
            // Leave a partial artifact behind so cleanup is exercised.
            invocation
                .context
                .namespace()
                .write(&Artifact::raster("partial_output"), b"partial")
                .await?;
            return Err(StepError::NonZeroExit {
                program: "failing".to_string(),
                code: Some(1),
                stderr: format!("simulated failure for scene {}", invocation.scene),
            });
        }
        self.inner.invoke(invocation).await
    }

    async fn ensure_available(&self, kind: StepKind) -> Result<(), StepError> {
        self.inner.ensure_available(kind).await
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
