// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod cleanup;
mod context;
mod location;

pub use cleanup::{CleanupRegistry, CleanupTarget};
pub use context::{ContextConfig, WorkerContext};
pub use location::{
    is_valid_name, Artifact, ArtifactFingerprint, ArtifactKind, Location, Namespace,
    NamespaceSnapshot,
};
