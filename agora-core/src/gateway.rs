//! AI call gateway.
//!
//! Every request to the generation service goes through [`Gateway`], which:
//! - picks the conversation window (none for intros and one-shot queries)
//! - strips code-fence markers from the reply
//! - retries exactly once on a fixed fallback model
//! - degrades to [`Generation::Unavailable`] instead of raising

use crate::conversation::ChatEntry;
use async_trait::async_trait;
use oracle::{Message, Oracle, Request};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Most recent session entries sent with a conversation call.
pub const DEFAULT_WINDOW: usize = 6;

/// The text-generation service, as the engine sees it.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a reply for `system` given the conversation `window`.
    async fn generate(
        &self,
        system: &str,
        window: &[Message],
        model: &str,
    ) -> Result<String, oracle::Error>;
}

#[async_trait]
impl Generator for Oracle {
    async fn generate(
        &self,
        system: &str,
        window: &[Message],
        model: &str,
    ) -> Result<String, oracle::Error> {
        let request = Request::new(system)
            .with_messages(window.to_vec())
            .with_model(model);
        Ok(self.complete(request).await?.reply)
    }
}

/// Outcome of a gateway call. `Unavailable` means "no new content": callers
/// must leave session state untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    Text(String),
    Unavailable,
}

impl Generation {
    pub fn text(&self) -> Option<&str> {
        match self {
            Generation::Text(text) => Some(text),
            Generation::Unavailable => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Generation::Text(text) => Some(text),
            Generation::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Generation::Unavailable)
    }
}

/// Model selection for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Model tried first.
    pub model: String,
    /// Model of the single retry.
    pub fallback_model: String,
    /// Conversation window size.
    pub window: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: oracle::DEFAULT_MODEL.to_string(),
            fallback_model: oracle::DEFAULT_MODEL.to_string(),
            window: DEFAULT_WINDOW,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = model.into();
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }
}

#[derive(Debug, Error)]
enum GatewayError {
    #[error(transparent)]
    Service(#[from] oracle::Error),

    #[error("reply was empty after sanitizing")]
    EmptyPayload,
}

/// Single choke point for generation calls.
#[derive(Clone)]
pub struct Gateway {
    generator: Arc<dyn Generator>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(generator: Arc<dyn Generator>, config: GatewayConfig) -> Self {
        Self { generator, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Greeting call. No conversation is sent so one scene cannot bleed into
    /// the next; the prompt carries everything.
    pub async fn intro(&self, system: &str) -> Generation {
        self.call(system, Vec::new()).await
    }

    /// Persona reply over the most recent entries of `session`.
    pub async fn converse(&self, system: &str, session: &[ChatEntry]) -> Generation {
        let start = session.len().saturating_sub(self.config.window);
        let window = session[start..].iter().map(ChatEntry::to_message).collect();
        self.call(system, window).await
    }

    /// Self-contained query (classification, summaries, selection).
    pub async fn oneshot(&self, system: &str) -> Generation {
        self.call(system, Vec::new()).await
    }

    async fn call(&self, system: &str, window: Vec<Message>) -> Generation {
        let primary = &self.config.model;
        match self.attempt(system, &window, primary).await {
            Ok(text) => return Generation::Text(text),
            Err(e) => {
                tracing::warn!(
                    model = %primary,
                    fallback = %self.config.fallback_model,
                    error = %e,
                    "generation failed, retrying on fallback model"
                );
            }
        }

        let fallback = &self.config.fallback_model;
        match self.attempt(system, &window, fallback).await {
            Ok(text) => Generation::Text(text),
            Err(e) => {
                tracing::warn!(
                    model = %fallback,
                    error = %e,
                    "fallback model failed, generation unavailable"
                );
                Generation::Unavailable
            }
        }
    }

    async fn attempt(
        &self,
        system: &str,
        window: &[Message],
        model: &str,
    ) -> Result<String, GatewayError> {
        let start = Instant::now();
        let raw = self.generator.generate(system, window, model).await?;
        let text = sanitize(&raw);
        if text.is_empty() {
            return Err(GatewayError::EmptyPayload);
        }

        tracing::info!(
            model = %model,
            duration_ms = %start.elapsed().as_millis(),
            window = window.len(),
            reply_len = text.len(),
            "generation completed"
        );
        Ok(text)
    }
}

/// Strip code-fence markers and surrounding whitespace.
pub fn sanitize(text: &str) -> String {
    text.replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    fn gateway(generator: &Arc<ScriptedGenerator>) -> Gateway {
        Gateway::new(
            generator.clone(),
            GatewayConfig::new()
                .with_model("primary")
                .with_fallback_model("safe"),
        )
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(sanitize("  ```level_3```  "), "level_3");
        assert_eq!(sanitize("texte simple"), "texte simple");
    }

    #[test]
    fn test_config_builder() {
        let config = GatewayConfig::new().with_window(4).with_fallback_model("safe");
        assert_eq!(config.window, 4);
        assert_eq!(config.model, oracle::DEFAULT_MODEL);
        assert_eq!(config.fallback_model, "safe");
    }

    #[tokio::test]
    async fn test_success_makes_one_call() {
        let generator = Arc::new(ScriptedGenerator::with_replies(["Bonjour"]));
        let result = gateway(&generator).oneshot("prompt").await;

        assert_eq!(result, Generation::Text("Bonjour".to_string()));
        let calls = generator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "primary");
    }

    #[tokio::test]
    async fn test_primary_failure_retries_once_on_fallback() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push_failure(500);
        generator.push_text("Réponse de secours");

        let result = gateway(&generator).oneshot("prompt").await;

        assert_eq!(result.text(), Some("Réponse de secours"));
        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].model, "primary");
        assert_eq!(calls[1].model, "safe");
    }

    #[tokio::test]
    async fn test_both_failures_degrade_to_sentinel() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push_failure(502);
        generator.push_failure(503);
        generator.push_text("never requested");

        let result = gateway(&generator).oneshot("prompt").await;

        assert!(result.is_unavailable());
        assert_eq!(generator.call_count(), 2);
        assert_eq!(generator.remaining(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_counts_as_failure() {
        let generator = Arc::new(ScriptedGenerator::with_replies(["```  ```", "ok"]));
        let result = gateway(&generator).oneshot("prompt").await;

        assert_eq!(result.text(), Some("ok"));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_intro_sends_no_window() {
        let generator = Arc::new(ScriptedGenerator::with_replies(["Bienvenue"]));
        gateway(&generator).intro("intro").await;
        assert!(generator.calls()[0].window.is_empty());
    }

    #[tokio::test]
    async fn test_converse_sends_last_six_entries() {
        let generator = Arc::new(ScriptedGenerator::with_replies(["suite"]));
        let session: Vec<ChatEntry> = (0..9)
            .map(|i| ChatEntry::user(format!("message {i}")))
            .collect();

        gateway(&generator).converse("debate", &session).await;

        let window = &generator.calls()[0].window;
        assert_eq!(window.len(), DEFAULT_WINDOW);
        assert_eq!(window[0].content, "message 3");
        assert_eq!(window[5].content, "message 8");
    }
}
