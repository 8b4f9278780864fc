//! Orchestration engine for a branching Socratic debate game.
//!
//! This crate provides:
//! - Scenario and persona content stores
//! - Per-persona conversation sessions and a cross-scene history
//! - A gateway to the generation service with one-shot model fallback
//! - The decision router, profile synthesizer and next-scene selector
//! - The scene/turn state machine tying them together
//!
//! # Quick Start
//!
//! ```ignore
//! use agora_core::{DebateSession, SessionConfig, TurnOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::from_env();
//!     let mut session = DebateSession::open("scenario.json", "personas.json", config).await?;
//!
//!     session.start().await?;
//!     match session.submit_player_utterance("Qui vit dans cette vallée ?").await? {
//!         TurnOutcome::Replied(reply) => {
//!             for beat in reply.beats {
//!                 println!("[{}] {}", reply.speaker, beat.text);
//!             }
//!         }
//!         TurnOutcome::Concluded(conclusion) => println!("{:?}", conclusion.decision),
//!         TurnOutcome::Unavailable => println!("(silence)"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod content;
pub mod context;
pub mod conversation;
pub mod decision;
pub mod engine;
pub mod gateway;
pub mod profile;
pub mod prompts;
pub mod report;
pub mod selector;
pub mod session;
pub mod testing;

// Primary public API
pub use content::{
    load_persona_registry, load_scene_graph, ContentError, Exit, Persona, PersonaId,
    PersonaRegistry, Phase, Scene, SceneGraph, SceneId,
};
pub use context::{PlayContext, Stage};
pub use conversation::{Beat, BeatKind, GlobalHistory, HistoryEvent, SessionManager};
pub use decision::{Basis, DebateStatus, Decision, DecisionRouter};
pub use engine::{
    Conclusion, Engine, EngineConfig, EngineError, Greeting, RenderedMessage, Reply, SceneEntry,
    TourStep, Transition, TurnOutcome,
};
pub use gateway::{Gateway, GatewayConfig, Generation, Generator};
pub use profile::{PlayerProfile, ProfileSynthesizer};
pub use report::RunReporter;
pub use selector::{PlayedScenes, SceneSelector};
pub use session::{DebateSession, SessionConfig, SessionError};
pub use testing::{ScriptedGenerator, TestHarness};
