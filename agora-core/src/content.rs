//! Static scenario content.
//!
//! Scenes and personas are loaded once from two JSON documents and never
//! mutated afterwards:
//! - the scenario graph `{ start, scenes: { id: Scene } }`
//! - the persona list `[ { id, name, role, bio, avatar, gender, secret_agenda } ]`
//!
//! Scenes keep the order in which the document declares them; the
//! next-scene fallback depends on it.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Scene loaded when the document does not name a start scene.
const CONVENTIONAL_START: &str = "level_1";

/// Errors from loading static content.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scenario declares no scenes")]
    NoScenes,

    #[error("Start scene '{0}' is not declared")]
    UnknownStart(SceneId),

    #[error("Persona '{0}' is declared twice")]
    DuplicatePersona(PersonaId),
}

// ============================================================================
// ID Types
// ============================================================================

/// Identifier of a scene in the scenario graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(String);

impl SceneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SceneId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a persona; keys every conversation session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(String);

impl PersonaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// Personas
// ============================================================================

/// An AI-driven character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub bio: String,
    /// Hidden motive steering the persona's arguments.
    #[serde(default)]
    pub secret_agenda: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Persona {
    /// Stand-in used when a target id has no matching persona.
    pub fn placeholder(id: PersonaId) -> Self {
        Self {
            id,
            name: "Système".to_string(),
            role: String::new(),
            bio: String::new(),
            secret_agenda: None,
            gender: None,
            avatar: None,
        }
    }

    /// Name with role, e.g. "Ayla (Chamane)".
    pub fn display_name(&self) -> String {
        if self.role.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.role)
        }
    }
}

/// Read-only lookup of the global persona list.
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    personas: Vec<Persona>,
    index: HashMap<PersonaId, usize>,
}

impl PersonaRegistry {
    /// Build a registry, rejecting duplicate ids.
    pub fn new(personas: Vec<Persona>) -> Result<Self, ContentError> {
        let mut index = HashMap::with_capacity(personas.len());
        for (i, persona) in personas.iter().enumerate() {
            if index.insert(persona.id.clone(), i).is_some() {
                return Err(ContentError::DuplicatePersona(persona.id.clone()));
            }
        }
        Ok(Self { personas, index })
    }

    /// Parse the persona list document.
    pub fn from_json(json: &str) -> Result<Self, ContentError> {
        let personas: Vec<Persona> = serde_json::from_str(json)?;
        Self::new(personas)
    }

    pub fn get(&self, id: &PersonaId) -> Option<&Persona> {
        self.index.get(id).map(|&i| &self.personas[i])
    }

    /// Personas in document order.
    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.iter()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

// ============================================================================
// Scenes
// ============================================================================

/// Narrative block of a scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Narrative {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub visual_cues: String,
    /// Co-present personas, scene-local.
    #[serde(default)]
    pub characters: Vec<Persona>,
    /// Explicit narrator; the first character speaks first otherwise.
    #[serde(default)]
    pub narrator: Option<PersonaId>,
    /// Free-form narrative plan handed to the greeting prompt.
    #[serde(default)]
    pub steps: Option<serde_json::Value>,
}

/// A named terminal condition of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exit {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target: Option<SceneId>,
}

/// Backdrop change keyed on the active persona's turn count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub turn: usize,
    pub image: String,
}

/// A narrative unit of the game.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    /// Filled from the scenario map key.
    #[serde(default)]
    pub id: SceneId,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub narrative: Option<Narrative>,
    #[serde(default)]
    pub exits: Vec<Exit>,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub background: Option<String>,
}

impl Scene {
    /// Scene-local characters; empty when the scene uses the global cast.
    pub fn characters(&self) -> &[Persona] {
        self.narrative
            .as_ref()
            .map(|n| n.characters.as_slice())
            .unwrap_or(&[])
    }

    /// The narrative context, or the theme when there is no narrative.
    pub fn context(&self) -> &str {
        match &self.narrative {
            Some(n) if !n.context.is_empty() => &n.context,
            _ => &self.theme,
        }
    }

    pub fn visual_cues(&self) -> &str {
        self.narrative
            .as_ref()
            .map(|n| n.visual_cues.as_str())
            .unwrap_or("")
    }

    pub fn narrator(&self) -> Option<&PersonaId> {
        self.narrative.as_ref().and_then(|n| n.narrator.as_ref())
    }

    pub fn steps(&self) -> Option<&serde_json::Value> {
        self.narrative.as_ref().and_then(|n| n.steps.as_ref())
    }

    /// Look up a declared exit by id.
    pub fn exit(&self, id: &str) -> Option<&Exit> {
        self.exits.iter().find(|e| e.id == id)
    }

    /// Latest phase reached at `turn`.
    pub fn phase_at(&self, turn: usize) -> Option<&Phase> {
        self.phases
            .iter()
            .filter(|p| p.turn <= turn)
            .max_by_key(|p| p.turn)
    }

    /// Narration shown before anyone speaks: cues then context, in italics.
    pub fn opening_narration(&self) -> String {
        let text = format!("{} {}", self.visual_cues(), self.context());
        format!("*{}*", text.trim())
    }
}

/// Read-only lookup of the scenario graph.
#[derive(Debug, Clone)]
pub struct SceneGraph {
    start: SceneId,
    order: Vec<SceneId>,
    scenes: HashMap<SceneId, Scene>,
}

impl SceneGraph {
    /// Parse the scenario document.
    pub fn from_json(json: &str) -> Result<Self, ContentError> {
        let document: ScenarioDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    fn from_document(document: ScenarioDocument) -> Result<Self, ContentError> {
        let mut order = Vec::with_capacity(document.scenes.0.len());
        let mut scenes = HashMap::with_capacity(document.scenes.0.len());

        for (id, mut scene) in document.scenes.0 {
            scene.id = id.clone();
            if scenes.insert(id.clone(), scene).is_none() {
                order.push(id);
            }
        }

        let start = match document.start {
            Some(start) if scenes.contains_key(&start) => start,
            Some(start) => return Err(ContentError::UnknownStart(start)),
            None => {
                let conventional = SceneId::from(CONVENTIONAL_START);
                if scenes.contains_key(&conventional) {
                    conventional
                } else {
                    order.first().cloned().ok_or(ContentError::NoScenes)?
                }
            }
        };

        Ok(Self {
            start,
            order,
            scenes,
        })
    }

    pub fn start(&self) -> &SceneId {
        &self.start
    }

    pub fn get(&self, id: &str) -> Option<&Scene> {
        self.scenes.get(&SceneId::from(id))
    }

    /// Resolve a requested id literally, then through its shorthand form
    /// (`"2"` with prefix `"level_"` becomes `"level_2"`).
    pub fn resolve(&self, requested: &str, shorthand_prefix: &str) -> Option<&Scene> {
        self.get(requested)
            .or_else(|| self.get(&format!("{shorthand_prefix}{requested}")))
    }

    /// Scene ids in document order.
    pub fn ids(&self) -> impl Iterator<Item = &SceneId> {
        self.order.iter()
    }

    /// Scenes in document order.
    pub fn scenes(&self) -> impl Iterator<Item = &Scene> {
        self.order.iter().filter_map(|id| self.scenes.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Load the scenario graph from a JSON file.
pub async fn load_scene_graph(path: impl AsRef<Path>) -> Result<SceneGraph, ContentError> {
    let content = fs::read_to_string(path).await?;
    SceneGraph::from_json(&content)
}

/// Load the persona list from a JSON file.
pub async fn load_persona_registry(
    path: impl AsRef<Path>,
) -> Result<PersonaRegistry, ContentError> {
    let content = fs::read_to_string(path).await?;
    PersonaRegistry::from_json(&content)
}

#[derive(Debug, Deserialize)]
struct ScenarioDocument {
    #[serde(default)]
    start: Option<SceneId>,
    scenes: OrderedScenes,
}

/// Scene map that remembers declaration order.
#[derive(Debug)]
struct OrderedScenes(Vec<(SceneId, Scene)>);

impl<'de> Deserialize<'de> for OrderedScenes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScenesVisitor;

        impl<'de> Visitor<'de> for ScenesVisitor {
            type Value = OrderedScenes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of scene id to scene")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut scenes = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((id, scene)) = map.next_entry::<SceneId, Scene>()? {
                    scenes.push((id, scene));
                }
                Ok(OrderedScenes(scenes))
            }
        }

        deserializer.deserialize_map(ScenesVisitor)
    }
}
