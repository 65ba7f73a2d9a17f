// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::budget::ResourceBudget;
use crate::engine::unit::{StepKind, WorkUnit};
use crate::errors::{FailureStrategy, PipelineError, PipelineResult, StepError, UnitFailure};
use crate::observability::messages::engine::{
    PoolCancelled, PoolDrained, PoolStarted, StepWarning, UnitCompleted, UnitDispatched,
    UnitFailed,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{ProcessingStep, StepInvocation};
use crate::workspace::{Artifact, Location, WorkerContext};

/// Knobs for one pool run.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolOptions {
    pub max_concurrency: usize,
    pub memory_per_worker_mb: u64,
    /// Mark a unit failed when its steps have not finished after this long.
    pub unit_timeout: Option<Duration>,
    pub failure_strategy: FailureStrategy,
}

impl PoolOptions {
    pub fn from_budget(budget: &ResourceBudget) -> Self {
        Self {
            max_concurrency: budget.pool_concurrency(),
            memory_per_worker_mb: budget.per_worker_memory_mb,
            unit_timeout: None,
            failure_strategy: FailureStrategy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }
}

/// A unit whose steps all succeeded. Its context still holds the outputs and
/// must be handed to the reconciler; dropping it discards them.
#[derive(Debug)]
pub struct CompletedUnit {
    pub sequence: usize,
    pub unit: WorkUnit,
    pub context: WorkerContext,
    pub produced: Vec<Artifact>,
    pub warnings: Vec<String>,
}

/// Terminal state of every unit submitted to a pool.
#[derive(Debug, Default)]
pub struct PoolReport {
    /// In submission order.
    pub completed: Vec<CompletedUnit>,
    /// In submission order.
    pub failures: Vec<UnitFailure>,
    /// Ids of units that never ran to completion because the pool was cancelled.
    pub cancelled: Vec<String>,
    pub peak_active: usize,
}

impl PoolReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }
}

enum UnitOutcome {
    Completed(CompletedUnit),
    Failed(usize, UnitFailure),
    Cancelled(usize, String),
    Fatal(PipelineError),
}

struct PoolShared {
    label: String,
    location: Arc<Location>,
    step: Arc<dyn ProcessingStep>,
    options: PoolOptions,
    cancel: CancellationToken,
    scenes: Mutex<HashSet<String>>,
    submitted: AtomicUsize,
    dispatched: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl PoolShared {
    fn lock_scenes(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.scenes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release_scene(&self, scene: &str) {
        self.lock_scenes().remove(scene);
    }

    fn cancel(&self, reason: &str) {
        if !self.cancel.is_cancelled() {
            PoolCancelled {
                label: &self.label,
                reason,
            }
            .log();
            self.cancel.cancel();
        }
    }
}

/// Counts a unit as active for as long as it executes, including when its
/// future is dropped by cancellation.
struct ActiveGuard<'a>(&'a PoolShared);

impl<'a> ActiveGuard<'a> {
    fn enter(shared: &'a PoolShared) -> Self {
        let now = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_active.fetch_max(now, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded-concurrency executor running every unit in its own worker context.
///
/// Units start in submission order as slots free up and complete in any
/// order. A failing unit is recorded and does not disturb its siblings unless
/// the pool runs with [`FailureStrategy::FailFast`]. Cancelling the pool stops
/// dispatch and tears down every in-flight context; nothing a cancelled unit
/// wrote is ever returned.
///
/// Must be created inside a Tokio runtime.
pub struct IsolatedWorkerPool {
    shared: Arc<PoolShared>,
    sender: Option<UnboundedSender<(usize, WorkUnit)>>,
    dispatcher: Option<JoinHandle<PipelineResult<PoolReport>>>,
}

impl IsolatedWorkerPool {
    pub fn new(
        label: impl Into<String>,
        location: Arc<Location>,
        step: Arc<dyn ProcessingStep>,
        options: PoolOptions,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
        let shared = Arc::new(PoolShared {
            label: label.into(),
            location,
            step,
            options,
            cancel: CancellationToken::new(),
            scenes: Mutex::new(HashSet::new()),
            submitted: AtomicUsize::new(0),
            dispatched: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        });
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), semaphore, receiver));

        Self {
            shared,
            sender: Some(sender),
            dispatcher: Some(dispatcher),
        }
    }

    /// Submit every unit, then wait for all of them.
    pub async fn run(
        label: impl Into<String>,
        location: Arc<Location>,
        step: Arc<dyn ProcessingStep>,
        options: PoolOptions,
        units: Vec<WorkUnit>,
    ) -> PipelineResult<PoolReport> {
        let pool = Self::new(label, location, step, options);
        PoolStarted {
            label: &pool.shared.label,
            unit_count: units.len(),
            max_concurrency: pool.shared.options.max_concurrency.max(1),
            memory_per_worker_mb: pool.shared.options.memory_per_worker_mb,
        }
        .log();
        for unit in units {
            pool.submit(unit)?;
        }
        pool.wait().await
    }

    /// Queue a unit. Fails if a unit for the same scene is still queued or
    /// running, or if the pool was cancelled.
    pub fn submit(&self, unit: WorkUnit) -> PipelineResult<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let sender = self.sender.as_ref().ok_or(PipelineError::Cancelled)?;
        if !self.shared.lock_scenes().insert(unit.scene.clone()) {
            return Err(PipelineError::DuplicateDispatch(unit.scene));
        }

        let sequence = self.shared.submitted.fetch_add(1, Ordering::SeqCst);
        let scene = unit.scene.clone();
        if sender.send((sequence, unit)).is_err() {
            self.shared.release_scene(&scene);
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Stop dispatching and tear down in-flight units.
    pub fn cancel(&self, reason: &str) {
        self.shared.cancel(reason);
    }

    /// Units currently executing.
    pub fn active_units(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Block until every submitted unit reached a terminal state.
    ///
    /// When this returns no unit is executing any more. Fatal conditions
    /// (context name conflicts, a panicking unit task) cancel the remaining
    /// units and are returned as errors.
    pub async fn wait(mut self) -> PipelineResult<PoolReport> {
        self.sender.take();
        let dispatcher = self.dispatcher.take().ok_or_else(|| PipelineError::Internal {
            message: "worker pool was already drained".to_string(),
        })?;
        let report = dispatcher.await.map_err(|e| PipelineError::Internal {
            message: format!("worker pool dispatcher failed: {}", e),
        })??;

        PoolDrained {
            label: &self.shared.label,
            completed: report.completed.len(),
            failed: report.failures.len(),
            cancelled: report.cancelled.len(),
            peak_active: report.peak_active,
        }
        .log();
        Ok(report)
    }
}

impl Drop for IsolatedWorkerPool {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            self.shared.cancel("pool dropped before it was drained");
        }
    }
}

async fn dispatch(
    shared: Arc<PoolShared>,
    semaphore: Arc<Semaphore>,
    mut receiver: UnboundedReceiver<(usize, WorkUnit)>,
) -> PipelineResult<PoolReport> {
    let mut tasks = JoinSet::new();
    let mut cancelled = Vec::new();

    loop {
        let (sequence, unit) = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };

        // Acquiring here, in the single dispatch loop, keeps dispatch FIFO.
        let permit = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                shared.release_scene(&unit.scene);
                cancelled.push((sequence, unit.id));
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.map_err(|e| PipelineError::Internal {
                    message: format!("worker pool semaphore closed: {}", e),
                })?
            }
        };

        tasks.spawn(run_unit(Arc::clone(&shared), sequence, unit, permit));
    }

    receiver.close();
    while let Ok((sequence, unit)) = receiver.try_recv() {
        shared.release_scene(&unit.scene);
        cancelled.push((sequence, unit.id));
    }

    let mut completed = Vec::new();
    let mut failures = Vec::new();
    let mut fatal = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(UnitOutcome::Completed(unit)) => completed.push(unit),
            Ok(UnitOutcome::Failed(sequence, failure)) => failures.push((sequence, failure)),
            Ok(UnitOutcome::Cancelled(sequence, id)) => cancelled.push((sequence, id)),
            Ok(UnitOutcome::Fatal(error)) => {
                shared.cancel(&error.to_string());
                fatal.get_or_insert(error);
            }
            Err(join_error) => {
                shared.cancel("a unit task panicked");
                fatal.get_or_insert(PipelineError::Internal {
                    message: format!("unit task join error: {}", join_error),
                });
            }
        }
    }

    if let Some(error) = fatal {
        return Err(error);
    }

    completed.sort_by_key(|unit| unit.sequence);
    failures.sort_by_key(|(sequence, _)| *sequence);
    cancelled.sort_by_key(|(sequence, _)| *sequence);

    Ok(PoolReport {
        completed,
        failures: failures.into_iter().map(|(_, failure)| failure).collect(),
        cancelled: cancelled.into_iter().map(|(_, id)| id).collect(),
        peak_active: shared.peak_active.load(Ordering::SeqCst),
    })
}

async fn run_unit(
    shared: Arc<PoolShared>,
    sequence: usize,
    unit: WorkUnit,
    permit: OwnedSemaphorePermit,
) -> UnitOutcome {
    let _permit = permit;
    let id = unit.id.clone();
    let scene = unit.scene.clone();

    // Dropping `execute` on cancellation drops its context, which removes the
    // private namespace.
    let outcome = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => UnitOutcome::Cancelled(sequence, id),
        outcome = execute(&shared, sequence, unit) => outcome,
    };

    shared.release_scene(&scene);
    outcome
}

async fn execute(shared: &PoolShared, sequence: usize, mut unit: WorkUnit) -> UnitOutcome {
    let position = shared.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
    UnitDispatched {
        unit_id: &unit.id,
        position,
        total: shared.submitted.load(Ordering::SeqCst),
    }
    .log();

    let context = match shared
        .location
        .create_context(
            &unit.id,
            unit.config.clone(),
            shared.options.memory_per_worker_mb,
        )
        .await
    {
        Ok(context) => context,
        Err(
            error @ (PipelineError::ContextConflict(_) | PipelineError::ReservedContextName(_)),
        ) => return UnitOutcome::Fatal(error),
        Err(error) => return fail(shared, sequence, &unit, None, error.to_string()),
    };
    unit.assigned_worker = Some(context.id().to_string());

    let _active = ActiveGuard::enter(shared);
    let started = Instant::now();
    let mut current = None;
    let result = match shared.options.unit_timeout {
        Some(limit) => {
            match tokio::time::timeout(limit, run_steps(shared, &unit, &context, &mut current))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(StepError::TimedOut(limit)),
            }
        }
        None => run_steps(shared, &unit, &context, &mut current).await,
    };

    match result {
        Ok((produced, warnings)) => {
            UnitCompleted {
                unit_id: &unit.id,
                step_count: unit.steps.len(),
                duration: started.elapsed(),
            }
            .log();
            UnitOutcome::Completed(CompletedUnit {
                sequence,
                unit,
                context,
                produced,
                warnings,
            })
        }
        Err(error) => {
            if let Err(e) = context.discard().await {
                tracing::warn!(unit_id = %unit.id, error = %e, "Failed to discard worker context");
            }
            fail(shared, sequence, &unit, current, error.to_string())
        }
    }
}

async fn run_steps(
    shared: &PoolShared,
    unit: &WorkUnit,
    context: &WorkerContext,
    current: &mut Option<StepKind>,
) -> Result<(Vec<Artifact>, Vec<String>), StepError> {
    let mut produced = Vec::new();
    let mut warnings = Vec::new();

    for request in &unit.steps {
        *current = Some(request.kind());
        let outcome = shared
            .step
            .invoke(StepInvocation {
                request,
                scene: &unit.scene,
                input: unit.input.as_deref(),
                context,
                location: &shared.location,
            })
            .await?;

        for warning in &outcome.warnings {
            StepWarning {
                unit_id: &unit.id,
                warning,
            }
            .log();
        }
        for artifact in outcome.produced {
            if !produced.contains(&artifact) {
                produced.push(artifact);
            }
        }
        warnings.extend(outcome.warnings);
    }

    Ok((produced, warnings))
}

fn fail(
    shared: &PoolShared,
    sequence: usize,
    unit: &WorkUnit,
    step: Option<StepKind>,
    reason: String,
) -> UnitOutcome {
    let step_name = step.map(|s| s.as_str()).unwrap_or("setup");
    UnitFailed {
        unit_id: &unit.id,
        step: step_name,
        error: &reason,
    }
    .log();

    if shared.options.failure_strategy == FailureStrategy::FailFast {
        shared.cancel(&format!("unit '{}' failed", unit.id));
    }

    UnitOutcome::Failed(
        sequence,
        UnitFailure {
            unit_id: unit.id.clone(),
            scene: unit.scene.clone(),
            step,
            reason,
        },
    )
}
