// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use crate::backends::CommandStep;
use crate::budget::HostCapacity;
use crate::config::{Config, PipelineConfig};
use crate::errors::PipelineResult;
use crate::pipeline::{run_import, run_mask, PipelineContext, RunSummary};
use crate::temporal::FileTemporalStore;
use crate::traits::{ProcessingStep, TemporalStore};
use crate::workspace::{CleanupRegistry, Location};

/// Builds a [`Runtime`] from configuration.
///
/// Steps default to external programs ([`CommandStep`]), the store to the
/// file-backed catalog in `config.store` and host capacity to what
/// [`HostCapacity::detect`] finds. Each can be replaced before `build`.
///
/// # Example
/// ```no_run
/// use scenestack::config::{load_and_validate_config, RuntimeBuilder};
/// use scenestack::workspace::CleanupRegistry;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_and_validate_config("scenestack.yaml")?;
/// let runtime = RuntimeBuilder::new(config).build();
/// let cleanup = CleanupRegistry::new();
/// let summary = runtime.run(&cleanup).await?;
/// cleanup.drain().await?;
/// println!("{}", summary);
/// # Ok(())
/// # }
/// ```
pub struct RuntimeBuilder {
    config: Config,
    step: Option<Arc<dyn ProcessingStep>>,
    store: Option<Arc<dyn TemporalStore>>,
    host: Option<HostCapacity>,
}

impl RuntimeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            step: None,
            store: None,
            host: None,
        }
    }

    pub fn with_step(mut self, step: Arc<dyn ProcessingStep>) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TemporalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_host(mut self, host: HostCapacity) -> Self {
        self.host = Some(host);
        self
    }

    pub fn build(self) -> Runtime {
        let Config {
            location,
            shared_namespace,
            failure_strategy,
            executor_options,
            steps,
            store: store_dir,
            pipeline,
        } = self.config;

        let step: Arc<dyn ProcessingStep> = match self.step {
            Some(step) => step,
            None => Arc::new(CommandStep::new(steps)),
        };
        let store: Arc<dyn TemporalStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileTemporalStore::new(store_dir)),
        };

        Runtime {
            context: PipelineContext {
                location: Arc::new(Location::new(location)),
                shared_namespace,
                step,
                store,
                executor: executor_options.executor_settings(failure_strategy),
                host: self.host.unwrap_or_else(HostCapacity::detect),
            },
            pipeline,
        }
    }
}

/// A configured pipeline, ready to run.
pub struct Runtime {
    context: PipelineContext,
    pipeline: PipelineConfig,
}

impl Runtime {
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    /// Run the configured pipeline. Leftovers are registered with `cleanup`;
    /// draining it is up to the caller.
    pub async fn run(&self, cleanup: &CleanupRegistry) -> PipelineResult<RunSummary> {
        match &self.pipeline {
            PipelineConfig::Import(settings) => run_import(&self.context, settings, cleanup).await,
            PipelineConfig::Mask(settings) => run_mask(&self.context, settings, cleanup).await,
        }
    }
}
