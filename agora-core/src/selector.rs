//! Next-scene selection among the scenes not played yet.

use crate::content::{SceneGraph, SceneId};
use crate::gateway::Gateway;
use crate::profile::PlayerProfile;
use crate::prompts;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Most candidates offered to the generation service in one request.
pub const MAX_CANDIDATES: usize = 15;

/// A scene offered for selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: SceneId,
    pub theme: String,
}

/// Scenes entered so far, in play order, without duplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayedScenes {
    order: Vec<SceneId>,
}

impl PlayedScenes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scene. Returns `false` if it was already played.
    pub fn insert(&mut self, id: SceneId) -> bool {
        if self.order.contains(&id) {
            return false;
        }
        self.order.push(id);
        true
    }

    pub fn contains(&self, id: &SceneId) -> bool {
        self.order.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Unplayed scenes in document order, capped at [`MAX_CANDIDATES`].
pub fn candidates(graph: &SceneGraph, played: &PlayedScenes) -> Vec<Candidate> {
    graph
        .scenes()
        .filter(|scene| !played.contains(&scene.id))
        .take(MAX_CANDIDATES)
        .map(|scene| Candidate {
            id: scene.id.clone(),
            theme: scene.theme.clone(),
        })
        .collect()
}

#[derive(Debug, Error)]
enum SelectionError {
    #[error("generation service unavailable")]
    Unavailable,

    #[error("recommended scene '{0}' is not a candidate")]
    NotACandidate(String),
}

/// Picks the scene that follows a concluded one when no exit names it.
#[derive(Clone)]
pub struct SceneSelector {
    gateway: Gateway,
}

impl SceneSelector {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Ask for a recommendation, falling back to the first candidate.
    /// Returns `None` once every scene has been played.
    pub async fn select(
        &self,
        graph: &SceneGraph,
        played: &PlayedScenes,
        profile: &PlayerProfile,
    ) -> Option<SceneId> {
        let candidates = candidates(graph, played);
        let first = candidates.first()?.id.clone();

        match self.recommend(&candidates, played.len(), profile).await {
            Ok(id) => {
                tracing::info!(scene = %id, "next scene selected");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(error = %e, fallback = %first, "scene selection fell back");
                Some(first)
            }
        }
    }

    async fn recommend(
        &self,
        candidates: &[Candidate],
        played_count: usize,
        profile: &PlayerProfile,
    ) -> Result<SceneId, SelectionError> {
        let prompt = prompts::scene_selection(profile, played_count, candidates);
        let text = self
            .gateway
            .oneshot(&prompt)
            .await
            .into_text()
            .ok_or(SelectionError::Unavailable)?;

        let id = clean_id(&text);
        candidates
            .iter()
            .find(|c| c.id.as_str() == id)
            .map(|c| c.id.clone())
            .ok_or(SelectionError::NotACandidate(id))
    }
}

/// Strip quotes, backticks and trailing dots around a bare id.
fn clean_id(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.') || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayConfig;
    use crate::testing::{ScriptedGenerator, SAMPLE_SCENARIO};
    use std::sync::Arc;

    fn selector(generator: &Arc<ScriptedGenerator>) -> SceneSelector {
        SceneSelector::new(Gateway::new(generator.clone(), GatewayConfig::new()))
    }

    fn graph() -> SceneGraph {
        SceneGraph::from_json(SAMPLE_SCENARIO).unwrap()
    }

    fn played(ids: &[&str]) -> PlayedScenes {
        let mut played = PlayedScenes::new();
        for id in ids {
            played.insert(SceneId::from(*id));
        }
        played
    }

    #[test]
    fn test_played_scenes_no_duplicates() {
        let mut played = PlayedScenes::new();
        assert!(played.insert(SceneId::from("level_1")));
        assert!(played.insert(SceneId::from("level_3")));
        assert!(!played.insert(SceneId::from("level_1")));
        let order: Vec<_> = played.iter().map(SceneId::as_str).collect();
        assert_eq!(order, vec!["level_1", "level_3"]);
    }

    #[test]
    fn test_candidates_capped_and_ordered() {
        let mut json = String::from(r#"{ "scenes": {"#);
        for i in 0..20 {
            if i > 0 {
                json.push(',');
            }
            json.push_str(&format!(r#""s{i}": {{"theme": "t{i}"}}"#));
        }
        json.push_str("} }");
        let graph = SceneGraph::from_json(&json).unwrap();

        let list = candidates(&graph, &played(&["s0", "s2"]));
        assert_eq!(list.len(), MAX_CANDIDATES);
        assert_eq!(list[0].id.as_str(), "s1");
        assert_eq!(list[1].id.as_str(), "s3");
    }

    #[test]
    fn test_clean_id() {
        assert_eq!(clean_id(" \"level_7\". "), "level_7");
        assert_eq!(clean_id("`level_9`"), "level_9");
    }

    #[tokio::test]
    async fn test_valid_recommendation() {
        let generator = Arc::new(ScriptedGenerator::with_replies(["\"level_9\""]));
        let next = selector(&generator)
            .select(&graph(), &played(&["level_1"]), &PlayerProfile::default())
            .await;
        assert_eq!(next, Some(SceneId::from("level_9")));
    }

    #[tokio::test]
    async fn test_played_recommendation_falls_back() {
        let generator = Arc::new(ScriptedGenerator::with_replies(["level_1"]));
        let next = selector(&generator)
            .select(&graph(), &played(&["level_1", "level_2"]), &PlayerProfile::default())
            .await;
        assert_eq!(next, Some(SceneId::from("level_3")));
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_first() {
        let generator = Arc::new(ScriptedGenerator::new());
        let next = selector(&generator)
            .select(&graph(), &played(&["level_1"]), &PlayerProfile::default())
            .await;
        assert_eq!(next, Some(SceneId::from("level_2")));
    }

    #[tokio::test]
    async fn test_none_when_everything_played() {
        let generator = Arc::new(ScriptedGenerator::with_replies(["level_1"]));
        let all = played(&["level_1", "level_2", "level_3", "level_7", "level_9"]);
        let next = selector(&generator)
            .select(&graph(), &all, &PlayerProfile::default())
            .await;
        assert_eq!(next, None);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_never_outside_candidates() {
        let graph = graph();
        let replies = ["level_99", "", "level_3", "LEVEL_2", "level_1"];
        for reply in replies {
            let generator = Arc::new(ScriptedGenerator::with_replies([reply]));
            let played = played(&["level_1"]);
            let next = selector(&generator)
                .select(&graph, &played, &PlayerProfile::default())
                .await
                .unwrap();
            assert!(!played.contains(&next), "reply {reply:?} selected a played scene");
            assert!(graph.get(next.as_str()).is_some());
        }
    }
}
