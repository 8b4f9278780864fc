//! Scene/turn state machine.
//!
//! ```text
//! LOADING → NARRATOR_INTRO → [TOUR] → DEBATING → DECIDING → BRANCH | SELECT_NEXT | END
//! ```
//!
//! [`Engine`] composes the content stores, the gateway and the deciding
//! components. Run state lives in a [`PlayContext`] passed to every call.

use crate::content::{Persona, PersonaId, PersonaRegistry, Phase, Scene, SceneGraph, SceneId};
use crate::context::{PlayContext, Stage};
use crate::conversation::{split_beats, Beat, EntryKind, Role, PLAYER_SPEAKER};
use crate::decision::{Decision, DecisionQuery, DecisionRouter};
use crate::gateway::{Gateway, GatewayConfig, Generation, Generator};
use crate::profile::ProfileSynthesizer;
use crate::prompts;
use crate::report::RunReporter;
use crate::selector::SceneSelector;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced to the presentation layer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Scene '{requested}' not found (also tried '{shorthand}')")]
    SceneNotFound { requested: String, shorthand: String },

    #[error("No scene is loaded")]
    NoActiveScene,

    #[error("Persona '{0}' is not present in this scene")]
    UnknownPersona(PersonaId),

    #[error("Player input is not accepted during {stage}")]
    NotAccepting { stage: Stage },

    #[error("Utterance is empty")]
    EmptyUtterance,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Target of scenes that declare no characters.
    pub fallback_persona: PersonaId,
    /// Prefix turning a bare scene number into a scene id.
    pub shorthand_prefix: String,
    /// Whether co-present personas greet the player on scene entry.
    pub guided_tour: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_persona: PersonaId::from("A-1"),
            shorthand_prefix: "level_".to_string(),
            guided_tour: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_persona(mut self, id: impl Into<String>) -> Self {
        self.fallback_persona = PersonaId::new(id);
        self
    }

    pub fn with_shorthand_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shorthand_prefix = prefix.into();
        self
    }

    pub fn with_guided_tour(mut self, enabled: bool) -> Self {
        self.guided_tour = enabled;
        self
    }
}

/// Beats a persona produced in one reply, already persisted.
#[derive(Debug, Clone)]
pub struct Reply {
    pub persona: PersonaId,
    pub speaker: String,
    pub beats: Vec<Beat>,
    /// Scene epoch the reply belongs to.
    pub epoch: u64,
}

/// What happened when a persona was addressed for the first time.
#[derive(Debug, Clone)]
pub enum Greeting {
    Delivered(Reply),
    /// The session already had content; the presentation replays it.
    Replayed,
    /// The generation service produced nothing.
    Unavailable,
}

/// Result of entering a scene.
#[derive(Debug, Clone)]
pub struct SceneEntry {
    pub scene: SceneId,
    pub target: PersonaId,
    /// Italic scene description shown before anyone speaks.
    pub narration: String,
    pub greeting: Greeting,
    /// Personas waiting to greet on the guided tour.
    pub tour_pending: usize,
    pub epoch: u64,
}

/// One acknowledged tour step.
#[derive(Debug, Clone)]
pub struct TourStep {
    pub persona: PersonaId,
    pub greeting: Greeting,
    pub remaining: usize,
}

/// Result of a player utterance.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Replied(Reply),
    /// The persona could not answer; nothing but the utterance was recorded.
    Unavailable,
    Concluded(Conclusion),
}

/// A concluded scene and where the run went next.
#[derive(Debug, Clone)]
pub struct Conclusion {
    pub decision: Decision,
    pub profile_updated: bool,
    pub next: Transition,
}

#[derive(Debug, Clone)]
pub enum Transition {
    /// The resolved exit named its target scene.
    Branch { exit_id: String, entry: SceneEntry },
    /// The selector picked the next scene.
    Next(SceneEntry),
    /// Every scene has been played.
    End,
}

/// A session entry ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// `None` for scene narration.
    pub speaker: Option<String>,
    pub role: Role,
    pub text: String,
    pub narration: bool,
}

/// The orchestration engine.
#[derive(Clone)]
pub struct Engine {
    scenes: Arc<SceneGraph>,
    personas: Arc<PersonaRegistry>,
    gateway: Gateway,
    router: DecisionRouter,
    synthesizer: ProfileSynthesizer,
    selector: SceneSelector,
    reporter: RunReporter,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        scenes: Arc<SceneGraph>,
        personas: Arc<PersonaRegistry>,
        generator: Arc<dyn Generator>,
        gateway: GatewayConfig,
        config: EngineConfig,
    ) -> Self {
        let gateway = Gateway::new(generator, gateway);
        Self {
            scenes,
            personas,
            router: DecisionRouter::new(gateway.clone()),
            synthesizer: ProfileSynthesizer::new(gateway.clone()),
            selector: SceneSelector::new(gateway.clone()),
            reporter: RunReporter::new(gateway.clone()),
            gateway,
            config,
        }
    }

    pub fn new_context(&self) -> PlayContext {
        PlayContext::new()
    }

    pub fn scenes(&self) -> &SceneGraph {
        &self.scenes
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load the scenario's start scene.
    pub async fn start(&self, ctx: &mut PlayContext) -> Result<SceneEntry, EngineError> {
        let start = self.scenes.start().clone();
        self.load_scene(ctx, start.as_str()).await
    }

    /// Enter a scene: resolve it, set up the cast and sessions, seed the
    /// narration and greet with the default persona.
    ///
    /// An unknown id fails before anything in `ctx` is touched.
    pub async fn load_scene(
        &self,
        ctx: &mut PlayContext,
        requested: &str,
    ) -> Result<SceneEntry, EngineError> {
        let scene = self.resolve(requested)?;

        ctx.stage = Stage::Loading;
        ctx.epoch += 1;
        if ctx.scene.as_ref() != Some(&scene.id) {
            ctx.sessions.reset_all();
        }
        ctx.played.insert(scene.id.clone());
        ctx.scene = Some(scene.id.clone());
        ctx.cast = self.cast_ids(scene);

        let target = self.default_target(scene);
        ctx.default_target = Some(target.clone());
        ctx.target = Some(target.clone());
        tracing::info!(
            scene = %scene.id,
            persona = %target,
            epoch = ctx.epoch,
            played = ctx.played.len(),
            "scene loaded"
        );

        ctx.stage = Stage::NarratorIntro;
        let narration = scene.opening_narration();
        let was_empty = ctx.sessions.is_empty(&target);
        ctx.sessions.create(&target);
        ctx.sessions.seed_context(&target, &narration);
        let greeting = if was_empty {
            self.greet(ctx, scene, &target).await
        } else {
            Greeting::Replayed
        };

        ctx.tour.clear();
        if was_empty && self.config.guided_tour && scene.characters().len() > 1 {
            ctx.tour.extend(ctx.cast.iter().filter(|id| **id != target).cloned());
        }
        ctx.stage = if ctx.tour.is_empty() {
            Stage::Debating
        } else {
            Stage::Tour
        };

        Ok(SceneEntry {
            scene: scene.id.clone(),
            target,
            narration,
            greeting,
            tour_pending: ctx.tour.len(),
            epoch: ctx.epoch,
        })
    }

    /// Administrative jump, bypassing branch resolution. Beats of the
    /// previous scene already persisted stay in the history; anything still
    /// being revealed belongs to an old epoch.
    pub async fn jump_to_scene(
        &self,
        ctx: &mut PlayContext,
        requested: &str,
    ) -> Result<SceneEntry, EngineError> {
        tracing::info!(from = ?ctx.scene, to = %requested, "administrative scene jump");
        self.load_scene(ctx, requested).await
    }

    /// Player acknowledged the current tour step: greet the next persona.
    ///
    /// Returns `None` once the tour is over; the target is then back on the
    /// default persona and the debate is open.
    pub async fn advance_tour(&self, ctx: &mut PlayContext) -> Result<Option<TourStep>, EngineError> {
        let scene = self.current_scene(ctx)?;
        if ctx.stage != Stage::Tour {
            return Ok(None);
        }

        let Some(persona) = ctx.tour.pop_front() else {
            ctx.target = ctx.default_target.clone();
            ctx.stage = Stage::Debating;
            return Ok(None);
        };

        ctx.target = Some(persona.clone());
        let greeting = self.open_session(ctx, scene, &persona).await;
        Ok(Some(TourStep {
            persona,
            greeting,
            remaining: ctx.tour.len(),
        }))
    }

    /// Switch the conversation to another persona of the current scene.
    pub async fn select_persona(
        &self,
        ctx: &mut PlayContext,
        persona: &PersonaId,
    ) -> Result<Greeting, EngineError> {
        let scene = self.current_scene(ctx)?;
        if !ctx.cast.contains(persona) {
            return Err(EngineError::UnknownPersona(persona.clone()));
        }
        if !matches!(ctx.stage, Stage::Tour | Stage::Debating) {
            return Err(EngineError::NotAccepting { stage: ctx.stage });
        }

        ctx.tour.retain(|p| p != persona);
        ctx.target = Some(persona.clone());
        tracing::debug!(persona = %persona, "persona selected");
        Ok(self.open_session(ctx, scene, persona).await)
    }

    /// Close a side conversation.
    pub fn return_to_default(&self, ctx: &mut PlayContext) -> Result<PersonaId, EngineError> {
        let default = ctx.default_target.clone().ok_or(EngineError::NoActiveScene)?;
        ctx.target = Some(default.clone());
        Ok(default)
    }

    /// Handle one player utterance addressed to the current target.
    pub async fn submit_utterance(
        &self,
        ctx: &mut PlayContext,
        text: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyUtterance);
        }
        let scene = self.current_scene(ctx)?;
        match ctx.stage {
            Stage::Debating => {}
            Stage::Tour => {
                // Speaking ends the tour
                ctx.tour.clear();
                ctx.stage = Stage::Debating;
            }
            stage => return Err(EngineError::NotAccepting { stage }),
        }
        let target = ctx.target.clone().ok_or(EngineError::NoActiveScene)?;

        ctx.sessions.create(&target);
        ctx.sessions.append_utterance(&scene.id, &target, text);
        let turn = ctx.sessions.turn_count(&target);

        let decision = {
            let transcript = ctx.sessions.history().for_scene(&scene.id);
            let query = DecisionQuery {
                utterance: text,
                theme: &scene.theme,
                turn,
                exits: &scene.exits,
                last_reply: ctx.sessions.last_reply(&target),
                transcript: &transcript,
            };
            self.router.decide(&query).await
        };

        if decision.is_decided() {
            let conclusion = self.conclude(ctx, scene, decision).await?;
            return Ok(TurnOutcome::Concluded(conclusion));
        }

        let persona = self.persona_in(scene, &target);
        let others: Vec<&Persona> = ctx
            .cast
            .iter()
            .filter(|id| **id != target)
            .filter_map(|id| self.lookup(scene, id))
            .collect();
        let prompt = prompts::debate(&persona, scene, &others, text, turn);
        tracing::debug!(persona = %target, turn, prompt_len = prompt.len(), "requesting persona reply");

        let generation = self
            .gateway
            .converse(&prompt, ctx.sessions.entries(&target))
            .await;
        match self.record_reply(ctx, scene, &persona, generation) {
            Some(reply) => Ok(TurnOutcome::Replied(reply)),
            None => {
                tracing::warn!(persona = %target, turn, "persona reply unavailable");
                Ok(TurnOutcome::Unavailable)
            }
        }
    }

    /// End-of-run synthesis over the whole history.
    pub async fn run_report(&self, ctx: &PlayContext) -> Option<String> {
        self.reporter.report(ctx.sessions.history(), &ctx.profile).await
    }

    /// Metadata of a persona in the current scene.
    pub fn persona(&self, ctx: &PlayContext, id: &PersonaId) -> Option<&Persona> {
        let scene = self.current_scene(ctx).ok()?;
        self.lookup(scene, id)
    }

    /// Personas present in the current scene, in cast order.
    pub fn active_personas(&self, ctx: &PlayContext) -> Vec<&Persona> {
        let Ok(scene) = self.current_scene(ctx) else {
            return Vec::new();
        };
        ctx.cast
            .iter()
            .filter_map(|id| self.lookup(scene, id))
            .collect()
    }

    /// A persona's session, ready for display.
    pub fn messages(&self, ctx: &PlayContext, id: &PersonaId) -> Vec<RenderedMessage> {
        let name = match self.current_scene(ctx) {
            Ok(scene) => self.persona_in(scene, id).name.clone(),
            Err(_) => id.to_string(),
        };

        ctx.sessions
            .entries(id)
            .iter()
            .map(|entry| {
                let speaker = match (entry.kind, entry.role) {
                    (EntryKind::Context, _) => None,
                    (_, Role::User) => Some(PLAYER_SPEAKER.to_string()),
                    (_, Role::Assistant) => Some(name.clone()),
                };
                RenderedMessage {
                    speaker,
                    role: entry.role,
                    text: entry.content.clone(),
                    narration: entry.kind != EntryKind::Dialogue,
                }
            })
            .collect()
    }

    /// Backdrop phase reached by the active persona's turn count.
    pub fn active_phase(&self, ctx: &PlayContext) -> Option<&Phase> {
        let scene = self.current_scene(ctx).ok()?;
        scene.phase_at(ctx.turn_count())
    }

    fn resolve(&self, requested: &str) -> Result<&Scene, EngineError> {
        let prefix = &self.config.shorthand_prefix;
        self.scenes.resolve(requested, prefix).ok_or_else(|| {
            tracing::warn!(scene = %requested, "scene not found");
            EngineError::SceneNotFound {
                requested: requested.to_string(),
                shorthand: format!("{prefix}{requested}"),
            }
        })
    }

    fn current_scene(&self, ctx: &PlayContext) -> Result<&Scene, EngineError> {
        ctx.scene
            .as_ref()
            .and_then(|id| self.scenes.get(id.as_str()))
            .ok_or(EngineError::NoActiveScene)
    }

    /// Scene-local characters, or the global persona list when there are none.
    fn cast_ids(&self, scene: &Scene) -> Vec<PersonaId> {
        if scene.characters().is_empty() {
            self.personas.iter().map(|p| p.id.clone()).collect()
        } else {
            scene.characters().iter().map(|p| p.id.clone()).collect()
        }
    }

    /// Explicit narrator, else first character, else the fallback persona.
    fn default_target(&self, scene: &Scene) -> PersonaId {
        scene
            .narrator()
            .or_else(|| scene.characters().first().map(|p| &p.id))
            .cloned()
            .unwrap_or_else(|| self.config.fallback_persona.clone())
    }

    fn lookup<'a>(&'a self, scene: &'a Scene, id: &PersonaId) -> Option<&'a Persona> {
        if scene.characters().is_empty() {
            self.personas.get(id)
        } else {
            scene.characters().iter().find(|p| &p.id == id)
        }
    }

    fn persona_in<'a>(&'a self, scene: &'a Scene, id: &PersonaId) -> Cow<'a, Persona> {
        match self.lookup(scene, id) {
            Some(persona) => Cow::Borrowed(persona),
            None => Cow::Owned(Persona::placeholder(id.clone())),
        }
    }

    /// Greet if the persona has never spoken in this scene, replay otherwise.
    async fn open_session(&self, ctx: &mut PlayContext, scene: &Scene, id: &PersonaId) -> Greeting {
        if ctx.sessions.create(id) || ctx.sessions.is_empty(id) {
            self.greet(ctx, scene, id).await
        } else {
            Greeting::Replayed
        }
    }

    async fn greet(&self, ctx: &mut PlayContext, scene: &Scene, id: &PersonaId) -> Greeting {
        let persona = self.persona_in(scene, id);
        let prompt = prompts::greeting(&persona, scene);
        let generation = self.gateway.intro(&prompt).await;
        match self.record_reply(ctx, scene, &persona, generation) {
            Some(reply) => Greeting::Delivered(reply),
            None => {
                tracing::warn!(scene = %scene.id, persona = %id, "greeting unavailable");
                Greeting::Unavailable
            }
        }
    }

    /// Split a generation into beats and persist them. `None` leaves the
    /// sessions untouched.
    fn record_reply(
        &self,
        ctx: &mut PlayContext,
        scene: &Scene,
        persona: &Persona,
        generation: Generation,
    ) -> Option<Reply> {
        let beats = split_beats(generation.text()?);
        if beats.is_empty() {
            return None;
        }
        tracing::debug!(persona = %persona.id, beats = beats.len(), "reply recorded");
        ctx.sessions
            .append_beats(&scene.id, &persona.id, &persona.name, &beats);
        Some(Reply {
            persona: persona.id.clone(),
            speaker: persona.name.clone(),
            beats,
            epoch: ctx.epoch,
        })
    }

    async fn conclude(
        &self,
        ctx: &mut PlayContext,
        scene: &Scene,
        decision: Decision,
    ) -> Result<Conclusion, EngineError> {
        ctx.stage = Stage::Deciding;

        let profile_updated = {
            let transcript = ctx.sessions.history().for_scene(&scene.id);
            self.synthesizer
                .synthesize(&mut ctx.profile, &scene.theme, &transcript)
                .await
        };
        if let Some(exit_id) = &decision.exit_id {
            ctx.profile.set_trait(scene.id.as_str(), exit_id.as_str());
        }

        let branch = decision
            .exit_id
            .as_deref()
            .and_then(|id| scene.exit(id))
            .and_then(|exit| exit.target.as_ref().map(|target| (exit, target)));

        let next = match branch {
            Some((exit, target)) if self.scenes.get(target.as_str()).is_some() => {
                tracing::info!(exit = %exit.id, scene = %target, "branching");
                let entry = self.load_scene(ctx, target.as_str()).await?;
                Transition::Branch {
                    exit_id: exit.id.clone(),
                    entry,
                }
            }
            _ => {
                if let Some((exit, target)) = branch {
                    tracing::warn!(exit = %exit.id, scene = %target, "exit targets an unknown scene");
                }
                match self.selector.select(&self.scenes, &ctx.played, &ctx.profile).await {
                    Some(next) => Transition::Next(self.load_scene(ctx, next.as_str()).await?),
                    None => {
                        tracing::info!(played = ctx.played.len(), "run ended");
                        ctx.stage = Stage::Ended;
                        Transition::End
                    }
                }
            }
        };

        Ok(Conclusion {
            decision,
            profile_updated,
            next,
        })
    }
}
