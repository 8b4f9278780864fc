//! Testing utilities for the debate engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedGenerator` for deterministic runs without network calls
//! - `TestHarness` for scripted play sessions over sample content
//! - Sample scenario and persona documents

use crate::content::{PersonaRegistry, SceneGraph};
use crate::engine::{EngineConfig, SceneEntry, TurnOutcome};
use crate::gateway::{GatewayConfig, Generator};
use crate::session::{DebateSession, SessionConfig};
use crate::EngineError;
use async_trait::async_trait;
use oracle::Message;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Sample scenario graph used by tests.
pub const SAMPLE_SCENARIO: &str = include_str!("fixtures/scenario.json");

/// Sample persona list used by tests.
pub const SAMPLE_PERSONAS: &str = include_str!("fixtures/personas.json");

/// A scripted generator reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    /// Fail with the given HTTP status.
    Failure(u16),
}

/// A request the generator received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub window: Vec<Message>,
    pub model: String,
}

/// A generator that returns scripted replies in order.
///
/// Once the script runs out every call fails with status 503.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator with text replies.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let generator = Self::new();
        for reply in replies {
            generator.push_text(reply);
        }
        generator
    }

    pub fn push_text(&self, text: impl Into<String>) {
        lock(&self.replies).push_back(ScriptedReply::Text(text.into()));
    }

    pub fn push_failure(&self, status: u16) {
        lock(&self.replies).push_back(ScriptedReply::Failure(status));
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Replies not consumed yet.
    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        system: &str,
        window: &[Message],
        model: &str,
    ) -> Result<String, oracle::Error> {
        lock(&self.calls).push(RecordedCall {
            system: system.to_string(),
            window: window.to_vec(),
            model: model.to_string(),
        });

        match lock(&self.replies).pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Failure(status)) => Err(oracle::Error::Api {
                status,
                message: "scripted failure".to_string(),
            }),
            None => Err(oracle::Error::Api {
                status: 503,
                message: "script exhausted".to_string(),
            }),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Test harness for running scripted play sessions.
pub struct TestHarness {
    /// The session under test.
    pub session: DebateSession,
    /// The generator behind the session's gateway.
    pub generator: Arc<ScriptedGenerator>,
}

impl TestHarness {
    /// Create a harness over the sample content.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a harness over the sample content with a custom engine config.
    pub fn with_config(engine: EngineConfig) -> Self {
        let scenes = match SceneGraph::from_json(SAMPLE_SCENARIO) {
            Ok(scenes) => scenes,
            Err(e) => panic!("sample scenario is invalid: {e}"),
        };
        let personas = match PersonaRegistry::from_json(SAMPLE_PERSONAS) {
            Ok(personas) => personas,
            Err(e) => panic!("sample personas are invalid: {e}"),
        };
        Self::with_content(scenes, personas, engine)
    }

    /// Create a harness over custom content.
    pub fn with_content(scenes: SceneGraph, personas: PersonaRegistry, engine: EngineConfig) -> Self {
        let generator = Arc::new(ScriptedGenerator::new());
        let config = SessionConfig::new()
            .with_gateway(
                GatewayConfig::new()
                    .with_model("test-model")
                    .with_fallback_model("test-fallback"),
            )
            .with_engine(engine);
        let session = DebateSession::with_generator(scenes, personas, generator.clone(), config);
        Self { session, generator }
    }

    /// Queue a generator reply.
    pub fn expect_reply(&mut self, text: impl Into<String>) -> &mut Self {
        self.generator.push_text(text);
        self
    }

    /// Queue a generator failure (consumes one attempt).
    pub fn expect_failure(&mut self) -> &mut Self {
        self.generator.push_failure(500);
        self
    }

    /// Load a scene.
    pub async fn load(&mut self, scene: &str) -> Result<SceneEntry, EngineError> {
        self.session.load_scene(scene).await
    }

    /// Send a player utterance.
    pub async fn say(&mut self, text: &str) -> Result<TurnOutcome, EngineError> {
        self.session.submit_player_utterance(text).await
    }

    /// Number of generator calls made so far.
    pub fn calls(&self) -> usize {
        self.generator.call_count()
    }

    /// System prompt of the most recent generator call.
    pub fn last_prompt(&self) -> Option<String> {
        self.generator.calls().last().map(|c| c.system.clone())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the session is in the given scene.
#[track_caller]
pub fn assert_scene(harness: &TestHarness, expected: &str) {
    let actual = harness.session.context().current_scene().map(|s| s.as_str());
    assert_eq!(
        actual,
        Some(expected),
        "Expected current scene '{expected}', got {actual:?}"
    );
}

/// Assert the active persona target.
#[track_caller]
pub fn assert_target(harness: &TestHarness, expected: &str) {
    let actual = harness.session.context().current_target().map(|p| p.as_str());
    assert_eq!(
        actual,
        Some(expected),
        "Expected persona target '{expected}', got {actual:?}"
    );
}
