//! Rolling player profile.

use crate::conversation::HistoryEvent;
use crate::gateway::Gateway;
use crate::prompts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary a run starts with.
pub const INITIAL_SUMMARY: &str = "Nouveau venu curieux.";

/// What the run has learned about the player's values.
///
/// The summary is only ever replaced as a whole by [`ProfileSynthesizer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    summary: String,
    #[serde(default)]
    traits: BTreeMap<String, String>,
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self {
            summary: INITIAL_SUMMARY.to_string(),
            traits: BTreeMap::new(),
        }
    }
}

impl PlayerProfile {
    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn traits(&self) -> &BTreeMap<String, String> {
        &self.traits
    }

    /// Record a trait. The engine stores each concluded scene's exit under
    /// the scene id, e.g. `"level_3" => "EXTRACT"`.
    pub(crate) fn set_trait(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.traits.insert(key.into(), value.into());
    }

    fn replace_summary(&mut self, summary: String) {
        self.summary = summary;
    }
}

/// Rewrites the profile summary after each concluded scene.
#[derive(Clone)]
pub struct ProfileSynthesizer {
    gateway: Gateway,
}

impl ProfileSynthesizer {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Issue exactly one summarization call over the scene transcript.
    ///
    /// Returns whether the summary was replaced. On failure the profile is
    /// left exactly as it was.
    pub async fn synthesize(
        &self,
        profile: &mut PlayerProfile,
        theme: &str,
        transcript: &[&HistoryEvent],
    ) -> bool {
        let prompt = prompts::profile_update(profile.summary(), theme, transcript);
        let Some(text) = self.gateway.oneshot(&prompt).await.into_text() else {
            tracing::warn!(theme = %theme, "profile update skipped, generation unavailable");
            return false;
        };

        let summary = clean_summary(&text);
        if summary.is_empty() {
            tracing::warn!(theme = %theme, "profile update skipped, empty summary");
            return false;
        }

        tracing::info!(summary = %summary, "player profile updated");
        profile.replace_summary(summary);
        true
    }
}

fn clean_summary(text: &str) -> String {
    text.trim()
        .trim_matches(|c| c == '"' || c == '«' || c == '»')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SceneId;
    use crate::conversation::{Role, PLAYER_SPEAKER};
    use crate::gateway::GatewayConfig;
    use crate::testing::ScriptedGenerator;
    use std::sync::Arc;

    fn synthesizer(generator: &Arc<ScriptedGenerator>) -> ProfileSynthesizer {
        ProfileSynthesizer::new(Gateway::new(generator.clone(), GatewayConfig::new()))
    }

    fn transcript() -> Vec<HistoryEvent> {
        vec![HistoryEvent {
            scene_id: SceneId::from("level_3"),
            role: Role::User,
            speaker_name: PLAYER_SPEAKER.to_string(),
            content: "On évacue tout le monde.".to_string(),
        }]
    }

    #[test]
    fn test_default_profile() {
        let profile = PlayerProfile::default();
        assert_eq!(profile.summary(), INITIAL_SUMMARY);
        assert!(profile.traits().is_empty());
    }

    #[test]
    fn test_clean_summary() {
        assert_eq!(clean_summary("  \"A protégé les mineurs.\" "), "A protégé les mineurs.");
        assert_eq!(clean_summary("« Prudent. »"), "Prudent.");
    }

    #[tokio::test]
    async fn test_summary_replaced_wholesale() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            "\"A fait passer les vies avant le profit.\"",
        ]));
        let events = transcript();
        let refs: Vec<&HistoryEvent> = events.iter().collect();
        let mut profile = PlayerProfile::default();

        let updated = synthesizer(&generator)
            .synthesize(&mut profile, "La mine", &refs)
            .await;

        assert!(updated);
        assert_eq!(profile.summary(), "A fait passer les vies avant le profit.");
        assert!(!profile.summary().contains(INITIAL_SUMMARY));
        assert_eq!(generator.call_count(), 1);
        assert!(generator.calls()[0].system.contains("On évacue tout le monde."));
    }

    #[tokio::test]
    async fn test_failure_keeps_profile() {
        let generator = Arc::new(ScriptedGenerator::new());
        let mut profile = PlayerProfile::default();
        profile.set_trait("prudence", "élevée");
        let before = profile.clone();

        let updated = synthesizer(&generator).synthesize(&mut profile, "La mine", &[]).await;

        assert!(!updated);
        assert_eq!(profile, before);
    }
}
