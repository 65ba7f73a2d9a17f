// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Deserialize;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use crate::workspace::location::{Location, Namespace};

/// Private configuration handed to every step of one unit.
///
/// Nothing here is ever written into the orchestrator's own process
/// environment; backends turn it into per-invocation arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContextConfig {
    /// Region whose extent the unit's steps are restricted to.
    #[serde(default)]
    pub region: Option<String>,
    /// Free-form step settings (e.g. `extent: region`).
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Extra environment for child processes of this unit.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ContextConfig {
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

/// Isolated execution context of one work unit.
///
/// Owns a private namespace that no other active context references. The
/// namespace is removed by [`WorkerContext::discard`], or synchronously on
/// drop if the context is abandoned (cancelled task, panic, early return).
#[derive(Debug)]
pub struct WorkerContext {
    id: String,
    namespace: Namespace,
    config: ContextConfig,
    memory_mb: u64,
    location: Arc<Location>,
    discarded: bool,
}

impl WorkerContext {
    pub(crate) fn new(
        id: String,
        namespace: Namespace,
        config: ContextConfig,
        memory_mb: u64,
        location: Arc<Location>,
    ) -> Self {
        Self {
            id,
            namespace,
            config,
            memory_mb,
            location,
            discarded: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory_mb
    }

    /// Delete the private namespace and release the context name.
    pub async fn discard(mut self) -> io::Result<()> {
        self.discarded = true;
        self.location.release(&self.id);
        match tokio::fs::remove_dir_all(self.namespace.path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        if self.discarded {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(self.namespace.path()) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    context = %self.id,
                    error = %e,
                    "Failed to remove abandoned worker context"
                );
            }
        }
        self.location.release(&self.id);
    }
}
