// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

use crate::errors::{PipelineError, PipelineResult};
use crate::mask::scene::MaskScene;
use crate::workspace::Artifact;

/// Per-scene progress through mask computation and merging.
///
/// ```text
/// PendingDecision -> Skipped  -> Standalone -> Merged
///                 -> Computed -> Standalone
///                 Computed | Standalone -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskState {
    PendingDecision,
    /// Metadata cloud percentage below the threshold; no computation.
    Skipped,
    /// A detection unit was dispatched.
    Computed,
    /// The scene's own mask artifact is final.
    Standalone,
    /// The scene points at a same-date merged artifact.
    Merged,
    /// A unit this scene depends on failed; the scene is not registered.
    Failed,
}

impl MaskState {
    pub fn can_transition_to(self, next: MaskState) -> bool {
        use MaskState::*;
        matches!(
            (self, next),
            (PendingDecision, Skipped)
                | (PendingDecision, Computed)
                | (Skipped, Standalone)
                | (Computed, Standalone)
                | (Standalone, Merged)
                | (Computed, Failed)
                | (Standalone, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MaskState::Standalone | MaskState::Merged | MaskState::Failed
        )
    }
}

impl fmt::Display for MaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MaskState::PendingDecision => "PENDING_DECISION",
            MaskState::Skipped => "SKIPPED",
            MaskState::Computed => "COMPUTED",
            MaskState::Standalone => "STANDALONE",
            MaskState::Merged => "MERGED",
            MaskState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A scene together with its state and current mask pointers.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneRecord {
    pub scene: MaskScene,
    pub state: MaskState,
    /// Set when the decision skipped mask computation.
    pub skipped: bool,
    pub cloud: Artifact,
    pub shadow: Option<Artifact>,
}

impl SceneRecord {
    pub fn new(scene: MaskScene, with_shadows: bool) -> Self {
        let cloud = scene.cloud_artifact();
        let shadow = with_shadows.then(|| scene.shadow_artifact());
        Self {
            scene,
            state: MaskState::PendingDecision,
            skipped: false,
            cloud,
            shadow,
        }
    }

    pub fn name(&self) -> &str {
        &self.scene.name
    }

    pub fn advance(&mut self, next: MaskState) -> PipelineResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::Internal {
                message: format!(
                    "scene '{}' cannot move from {} to {}",
                    self.scene.name, self.state, next
                ),
            });
        }
        if next == MaskState::Skipped {
            self.skipped = true;
        }
        self.state = next;
        Ok(())
    }

    /// Mask artifacts this scene currently points at.
    pub fn masks(&self) -> impl Iterator<Item = &Artifact> {
        std::iter::once(&self.cloud).chain(self.shadow.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_documented_transitions_are_allowed() {
        use MaskState::*;
        assert!(PendingDecision.can_transition_to(Skipped));
        assert!(PendingDecision.can_transition_to(Computed));
        assert!(Skipped.can_transition_to(Standalone));
        assert!(Standalone.can_transition_to(Merged));
        assert!(!PendingDecision.can_transition_to(Merged));
        assert!(!Skipped.can_transition_to(Computed));
        assert!(!Merged.can_transition_to(Standalone));
        assert!(!Skipped.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states() {
        assert!(!MaskState::PendingDecision.is_terminal());
        assert!(!MaskState::Computed.is_terminal());
        assert!(MaskState::Standalone.is_terminal());
        assert!(MaskState::Merged.is_terminal());
        assert!(MaskState::Failed.is_terminal());
    }
}
