//! Play context: the mutable state of one run.
//!
//! The engine holds no run state of its own; every operation takes the
//! context explicitly, so several independent runs can share one engine.

use crate::content::{PersonaId, SceneId};
use crate::conversation::{GlobalHistory, SessionManager};
use crate::profile::PlayerProfile;
use crate::selector::PlayedScenes;
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Where the scene state machine stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loading,
    NarratorIntro,
    /// Co-present personas greet one by one, each step acknowledged by the player.
    Tour,
    Debating,
    Deciding,
    /// No unplayed scene remains.
    Ended,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loading => "LOADING",
            Stage::NarratorIntro => "NARRATOR_INTRO",
            Stage::Tour => "TOUR",
            Stage::Debating => "DEBATING",
            Stage::Deciding => "DECIDING",
            Stage::Ended => "END",
        };
        f.write_str(name)
    }
}

/// State of a single run.
#[derive(Debug, Clone)]
pub struct PlayContext {
    pub(crate) run_id: Uuid,
    pub(crate) scene: Option<SceneId>,
    pub(crate) target: Option<PersonaId>,
    pub(crate) default_target: Option<PersonaId>,
    pub(crate) cast: Vec<PersonaId>,
    pub(crate) tour: VecDeque<PersonaId>,
    pub(crate) stage: Stage,
    pub(crate) epoch: u64,
    pub(crate) sessions: SessionManager,
    pub(crate) profile: PlayerProfile,
    pub(crate) played: PlayedScenes,
}

impl Default for PlayContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scene: None,
            target: None,
            default_target: None,
            cast: Vec::new(),
            tour: VecDeque::new(),
            stage: Stage::Loading,
            epoch: 0,
            sessions: SessionManager::new(),
            profile: PlayerProfile::default(),
            played: PlayedScenes::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn current_scene(&self) -> Option<&SceneId> {
        self.scene.as_ref()
    }

    /// Persona the player is talking to.
    pub fn current_target(&self) -> Option<&PersonaId> {
        self.target.as_ref()
    }

    /// Persona the scene opened with.
    pub fn default_target(&self) -> Option<&PersonaId> {
        self.default_target.as_ref()
    }

    /// Ids of the personas present in the current scene.
    pub fn cast(&self) -> &[PersonaId] {
        &self.cast
    }

    /// Personas still waiting to greet the player.
    pub fn pending_tour(&self) -> impl Iterator<Item = &PersonaId> {
        self.tour.iter()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Incremented on every scene load.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether content produced under `epoch` still belongs to the active
    /// scene. Reveals from an older epoch should be dropped.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn history(&self) -> &GlobalHistory {
        self.sessions.history()
    }

    pub fn profile(&self) -> &PlayerProfile {
        &self.profile
    }

    pub fn played(&self) -> &PlayedScenes {
        &self.played
    }

    /// Player turns with the active persona.
    pub fn turn_count(&self) -> usize {
        self.target
            .as_ref()
            .map(|t| self.sessions.turn_count(t))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context() {
        let ctx = PlayContext::new();
        assert_eq!(ctx.stage(), Stage::Loading);
        assert!(ctx.current_scene().is_none());
        assert_eq!(ctx.turn_count(), 0);
        assert!(ctx.is_current(0));
        assert_ne!(ctx.run_id(), PlayContext::new().run_id());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::NarratorIntro.to_string(), "NARRATOR_INTRO");
        assert_eq!(Stage::Ended.to_string(), "END");
    }
}
