// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cloud and shadow masks: per-scene decisions, detection, same-date
//! patching and area filtering.

pub mod engine;
pub mod metadata;
pub mod scene;
pub mod state;

pub use engine::{MaskMergeEngine, MaskOutcome, MaskSettings, DEFAULT_SHADOW_THRESHOLD};
pub use metadata::JsonMetadataStore;
pub use scene::{collect_scenes, MaskScene, REQUIRED_BANDS};
pub use state::{MaskState, SceneRecord};
