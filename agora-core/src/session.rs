//! DebateSession - the primary public API for a play run.
//!
//! Bundles an [`Engine`] with the [`PlayContext`] of one run and exposes the
//! operations a presentation layer needs.

use crate::content::{
    load_persona_registry, load_scene_graph, ContentError, Persona, PersonaId, PersonaRegistry,
    Phase, SceneGraph,
};
use crate::context::{PlayContext, Stage};
use crate::engine::{
    Engine, EngineConfig, EngineError, Greeting, RenderedMessage, SceneEntry, TourStep, TurnOutcome,
};
use crate::gateway::{GatewayConfig, Generator};
use crate::profile::PlayerProfile;
use oracle::Oracle;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors from DebateSession construction and play.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Generation client error: {0}")]
    Client(#[from] oracle::Error),
}

/// Configuration for a play session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Generation service base URL; `AGORA_API_BASE` or the default when unset.
    pub api_base: Option<String>,

    /// Model selection and conversation window.
    pub gateway: GatewayConfig,

    /// State machine settings.
    pub engine: EngineConfig,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `AGORA_API_BASE`, `AGORA_MODEL` and `AGORA_FALLBACK_MODEL`.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(base) = std::env::var("AGORA_API_BASE") {
            config.api_base = Some(base);
        }
        if let Ok(model) = std::env::var("AGORA_MODEL") {
            config.gateway.model = model;
        }
        if let Ok(model) = std::env::var("AGORA_FALLBACK_MODEL") {
            config.gateway.fallback_model = model;
        }
        config
    }

    /// Set the generation service base URL.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    /// Set the gateway configuration.
    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = gateway;
        self
    }

    /// Set the engine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

/// One play run over a scenario.
pub struct DebateSession {
    engine: Engine,
    ctx: PlayContext,
}

impl DebateSession {
    /// Create a session talking to the generation service over HTTP.
    pub fn new(
        scenes: SceneGraph,
        personas: PersonaRegistry,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let client = match &config.api_base {
            Some(base) => Oracle::new(base)?,
            None => Oracle::from_env()?,
        };
        Ok(Self::with_generator(scenes, personas, Arc::new(client), config))
    }

    /// Create a session over any generator.
    pub fn with_generator(
        scenes: SceneGraph,
        personas: PersonaRegistry,
        generator: Arc<dyn Generator>,
        config: SessionConfig,
    ) -> Self {
        let engine = Engine::new(
            Arc::new(scenes),
            Arc::new(personas),
            generator,
            config.gateway,
            config.engine,
        );
        let ctx = engine.new_context();
        tracing::info!(run = %ctx.run_id(), scenes = engine.scenes().len(), "play session created");
        Self { engine, ctx }
    }

    /// Load the scenario and persona documents from disk.
    pub async fn open(
        scenario: impl AsRef<Path>,
        personas: impl AsRef<Path>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let scenes = load_scene_graph(scenario).await?;
        let personas = load_persona_registry(personas).await?;
        Self::new(scenes, personas, config)
    }

    /// Enter the scenario's start scene.
    pub async fn start(&mut self) -> Result<SceneEntry, EngineError> {
        self.engine.start(&mut self.ctx).await
    }

    pub async fn load_scene(&mut self, id: &str) -> Result<SceneEntry, EngineError> {
        self.engine.load_scene(&mut self.ctx, id).await
    }

    /// Administrative override, bypassing branch resolution.
    pub async fn jump_to_scene(&mut self, id: &str) -> Result<SceneEntry, EngineError> {
        self.engine.jump_to_scene(&mut self.ctx, id).await
    }

    pub async fn submit_player_utterance(&mut self, text: &str) -> Result<TurnOutcome, EngineError> {
        self.engine.submit_utterance(&mut self.ctx, text).await
    }

    /// Acknowledge the current tour step.
    pub async fn advance_tour(&mut self) -> Result<Option<TourStep>, EngineError> {
        self.engine.advance_tour(&mut self.ctx).await
    }

    pub async fn select_persona(&mut self, id: &PersonaId) -> Result<Greeting, EngineError> {
        self.engine.select_persona(&mut self.ctx, id).await
    }

    pub fn return_to_default(&mut self) -> Result<PersonaId, EngineError> {
        self.engine.return_to_default(&mut self.ctx)
    }

    /// End-of-run synthesis.
    pub async fn run_report(&self) -> Option<String> {
        self.engine.run_report(&self.ctx).await
    }

    /// Get the play context.
    pub fn context(&self) -> &PlayContext {
        &self.ctx
    }

    /// Get the engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn current_target(&self) -> Option<&PersonaId> {
        self.ctx.current_target()
    }

    /// Metadata of the current target.
    pub fn target_persona(&self) -> Option<&Persona> {
        let id = self.ctx.current_target()?;
        self.engine.persona(&self.ctx, id)
    }

    pub fn active_personas(&self) -> Vec<&Persona> {
        self.engine.active_personas(&self.ctx)
    }

    pub fn messages(&self, id: &PersonaId) -> Vec<RenderedMessage> {
        self.engine.messages(&self.ctx, id)
    }

    pub fn active_phase(&self) -> Option<&Phase> {
        self.engine.active_phase(&self.ctx)
    }

    pub fn profile(&self) -> &PlayerProfile {
        self.ctx.profile()
    }

    pub fn stage(&self) -> Stage {
        self.ctx.stage()
    }

    pub fn is_over(&self) -> bool {
        self.ctx.stage() == Stage::Ended
    }
}
