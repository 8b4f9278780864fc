//! Conversation state: one session per persona, plus the global history.
//!
//! The [`SessionManager`] is the only writer of both. A player utterance or a
//! generated beat is appended to the persona's session and then to the
//! [`GlobalHistory`], so the two never disagree on order.

use crate::content::{PersonaId, SceneId};
use oracle::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use oracle::Role;

/// Separator the personas are told to put between beats.
pub const BEAT_DELIMITER: &str = "###";

/// Speaker name recorded for the player.
pub const PLAYER_SPEAKER: &str = "Joueur";

// ============================================================================
// Beats
// ============================================================================

/// Whether a beat is spoken or described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeatKind {
    Dialogue,
    /// Third-person description, wrapped in `*...*`.
    Narration,
}

/// One segment of a multi-beat reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    pub text: String,
    pub kind: BeatKind,
}

impl Beat {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = if is_narration(&text) {
            BeatKind::Narration
        } else {
            BeatKind::Dialogue
        };
        Self { text, kind }
    }

    pub fn is_narration(&self) -> bool {
        self.kind == BeatKind::Narration
    }
}

/// Split a reply into its ordered beats. Empty segments are dropped.
pub fn split_beats(reply: &str) -> Vec<Beat> {
    reply
        .split(BEAT_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Beat::new)
        .collect()
}

fn is_narration(text: &str) -> bool {
    let text = text.trim();
    text.len() >= 2 && text.starts_with('*') && text.ends_with('*')
}

// ============================================================================
// Sessions
// ============================================================================

/// What a session entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Scene narration seeded before the narrator speaks.
    Context,
    Dialogue,
    Narration,
}

/// One message in a persona's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub content: String,
    pub kind: EntryKind,
}

impl ChatEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            kind: EntryKind::Dialogue,
        }
    }

    pub fn context(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            kind: EntryKind::Context,
        }
    }

    pub fn beat(beat: &Beat) -> Self {
        Self {
            role: Role::Assistant,
            content: beat.text.clone(),
            kind: match beat.kind {
                BeatKind::Dialogue => EntryKind::Dialogue,
                BeatKind::Narration => EntryKind::Narration,
            },
        }
    }

    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Ordered message history with a single persona.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSession {
    entries: Vec<ChatEntry>,
}

impl ChatSession {
    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    /// The last `n` entries.
    pub fn window(&self, n: usize) -> &[ChatEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// Number of player-authored entries.
    pub fn turn_count(&self) -> usize {
        self.entries.iter().filter(|e| e.role == Role::User).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn has_context(&self) -> bool {
        self.entries.iter().any(|e| e.kind == EntryKind::Context)
    }

    /// Most recent assistant message, context excluded.
    pub fn last_reply(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.role == Role::Assistant && e.kind != EntryKind::Context)
            .map(|e| e.content.as_str())
    }
}

// ============================================================================
// Global history
// ============================================================================

/// One dialogue event, tagged with the scene it happened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub scene_id: SceneId,
    pub role: Role,
    pub speaker_name: String,
    pub content: String,
}

/// Append-only, cross-scene log of every dialogue event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalHistory {
    events: Vec<HistoryEvent>,
}

impl GlobalHistory {
    fn record(&mut self, event: HistoryEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    /// Events of one scene, in order.
    pub fn for_scene(&self, scene: &SceneId) -> Vec<&HistoryEvent> {
        self.events.iter().filter(|e| &e.scene_id == scene).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ============================================================================
// Session manager
// ============================================================================

/// Owns every persona session and the global history.
#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    sessions: HashMap<PersonaId, ChatSession>,
    history: GlobalHistory,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `persona`. Returns `true` if it did not exist.
    pub fn create(&mut self, persona: &PersonaId) -> bool {
        if self.sessions.contains_key(persona) {
            return false;
        }
        self.sessions.insert(persona.clone(), ChatSession::default());
        true
    }

    /// Empty one persona's session.
    pub fn reset(&mut self, persona: &PersonaId) {
        if let Some(session) = self.sessions.get_mut(persona) {
            session.entries.clear();
        }
    }

    /// Drop every session; called when a different scene is entered.
    /// The global history is kept.
    pub fn reset_all(&mut self) {
        self.sessions.clear();
    }

    pub fn session(&self, persona: &PersonaId) -> Option<&ChatSession> {
        self.sessions.get(persona)
    }

    /// Entries of a persona's session, empty if none was opened.
    pub fn entries(&self, persona: &PersonaId) -> &[ChatEntry] {
        self.sessions
            .get(persona)
            .map(ChatSession::entries)
            .unwrap_or(&[])
    }

    /// Last `n` entries of a persona's session.
    pub fn window(&self, persona: &PersonaId, n: usize) -> &[ChatEntry] {
        self.sessions
            .get(persona)
            .map(|s| s.window(n))
            .unwrap_or(&[])
    }

    pub fn is_empty(&self, persona: &PersonaId) -> bool {
        self.sessions.get(persona).map_or(true, ChatSession::is_empty)
    }

    pub fn turn_count(&self, persona: &PersonaId) -> usize {
        self.sessions
            .get(persona)
            .map(ChatSession::turn_count)
            .unwrap_or(0)
    }

    pub fn last_reply(&self, persona: &PersonaId) -> Option<&str> {
        self.sessions.get(persona).and_then(ChatSession::last_reply)
    }

    pub fn history(&self) -> &GlobalHistory {
        &self.history
    }

    /// Append an entry to a persona's session only.
    pub fn append(&mut self, persona: &PersonaId, entry: ChatEntry) {
        self.sessions
            .entry(persona.clone())
            .or_default()
            .entries
            .push(entry);
    }

    /// Seed the scene narration into a session. Does nothing if the session
    /// already carries it; returns whether an entry was added.
    pub fn seed_context(&mut self, persona: &PersonaId, narration: &str) -> bool {
        if self.sessions.get(persona).is_some_and(ChatSession::has_context) {
            return false;
        }
        self.append(persona, ChatEntry::context(narration));
        true
    }

    /// Record a player utterance addressed to `persona`.
    pub fn append_utterance(&mut self, scene: &SceneId, persona: &PersonaId, text: &str) {
        self.append(persona, ChatEntry::user(text));
        self.history.record(HistoryEvent {
            scene_id: scene.clone(),
            role: Role::User,
            speaker_name: PLAYER_SPEAKER.to_string(),
            content: text.to_string(),
        });
    }

    /// Record generated beats in emission order, each one in the session and
    /// then in the history before the next.
    pub fn append_beats(
        &mut self,
        scene: &SceneId,
        persona: &PersonaId,
        speaker: &str,
        beats: &[Beat],
    ) {
        for beat in beats {
            self.append(persona, ChatEntry::beat(beat));
            self.history.record(HistoryEvent {
                scene_id: scene.clone(),
                role: Role::Assistant,
                speaker_name: speaker.to_string(),
                content: beat.text.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (SceneId, PersonaId) {
        (SceneId::from("level_1"), PersonaId::from("A-1"))
    }

    #[test]
    fn test_split_beats() {
        let beats = split_beats("*Elle se lève.* ### Bienvenue, Médiateur. ###   ### Asseyez-vous.");
        assert_eq!(beats.len(), 3);
        assert!(beats[0].is_narration());
        assert_eq!(beats[1].text, "Bienvenue, Médiateur.");
        assert_eq!(beats[1].kind, BeatKind::Dialogue);
        assert_eq!(beats[2].text, "Asseyez-vous.");
    }

    #[test]
    fn test_split_beats_empty_reply() {
        assert!(split_beats("  ###  ### ").is_empty());
    }

    #[test]
    fn test_narration_detection() {
        assert!(Beat::new("* La foule crie. *").is_narration());
        assert!(!Beat::new("*").is_narration());
        assert!(!Beat::new("Il dit *non*, puis part.").is_narration());
    }

    #[test]
    fn test_create_and_reset() {
        let (_, persona) = ids();
        let mut sessions = SessionManager::new();
        assert!(sessions.create(&persona));
        assert!(!sessions.create(&persona));
        sessions.append(&persona, ChatEntry::user("Bonjour"));
        assert!(!sessions.is_empty(&persona));
        sessions.reset(&persona);
        assert!(sessions.is_empty(&persona));
    }

    #[test]
    fn test_window_and_turn_count() {
        let (scene, persona) = ids();
        let mut sessions = SessionManager::new();
        for i in 0..5 {
            sessions.append_utterance(&scene, &persona, &format!("question {i}"));
            sessions.append_beats(&scene, &persona, "Aurèle", &[Beat::new(format!("réponse {i}"))]);
        }

        assert_eq!(sessions.turn_count(&persona), 5);
        let window = sessions.window(&persona, 6);
        assert_eq!(window.len(), 6);
        assert_eq!(window[5].content, "réponse 4");
        assert_eq!(window[0].content, "question 2");
        assert_eq!(sessions.last_reply(&persona), Some("réponse 4"));
    }

    #[test]
    fn test_seed_context_is_idempotent() {
        let (_, persona) = ids();
        let mut sessions = SessionManager::new();
        assert!(sessions.seed_context(&persona, "*Une vallée brumeuse.*"));
        assert!(!sessions.seed_context(&persona, "*Une vallée brumeuse.*"));
        assert_eq!(sessions.entries(&persona).len(), 1);
        // Context is not a turn and not a reply
        assert_eq!(sessions.turn_count(&persona), 0);
        assert_eq!(sessions.last_reply(&persona), None);
    }

    #[test]
    fn test_beats_mirrored_into_history_in_order() {
        let (scene, persona) = ids();
        let mut sessions = SessionManager::new();
        let beats = split_beats("*Il sourit.* ### Premier point. ### Second point.");
        sessions.append_beats(&scene, &persona, "Aurèle", &beats);

        let history = sessions.history().for_scene(&scene);
        assert_eq!(history.len(), 3);
        for (event, beat) in history.iter().zip(&beats) {
            assert_eq!(event.content, beat.text);
            assert_eq!(event.speaker_name, "Aurèle");
            assert_eq!(event.role, Role::Assistant);
        }
        let session: Vec<_> = sessions.entries(&persona).iter().map(|e| &e.content).collect();
        let logged: Vec<_> = history.iter().map(|e| &e.content).collect();
        assert_eq!(session, logged);
    }

    #[test]
    fn test_reset_all_keeps_history() {
        let (scene, persona) = ids();
        let mut sessions = SessionManager::new();
        sessions.append_utterance(&scene, &persona, "Je refuse.");
        sessions.reset_all();
        assert!(sessions.is_empty(&persona));
        assert_eq!(sessions.history().len(), 1);
        assert_eq!(sessions.history().events()[0].speaker_name, PLAYER_SPEAKER);
    }

    #[test]
    fn test_history_event_json_shape() {
        let (scene, _) = ids();
        let event = HistoryEvent {
            scene_id: scene,
            role: Role::User,
            speaker_name: PLAYER_SPEAKER.to_string(),
            content: "Oui.".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sceneId"], "level_1");
        assert_eq!(json["role"], "user");
        assert_eq!(json["speakerName"], "Joueur");
    }
}
