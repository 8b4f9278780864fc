//! Decision router: has the debate of a scene concluded, and on which exit?
//!
//! Strategies are tried in a fixed order; the first one that settles the
//! question wins:
//!
//! 1. **Gate**: before turn [`DECISION_GATE`] the debate always continues.
//! 2. **Keyword**: an explicit affirmation ("je suis sûr", "c'est décidé")
//!    concludes the debate without consulting the classifier. This overrides
//!    what the classifier would have said. Negated or deferred phrases
//!    ("je ne suis pas sûr", "je décide demain") do not count.
//! 3. **Classifier**: the generation service returns `{status, exitId}`,
//!    strict until [`LENIENT_AFTER`] turns, lenient afterwards.
//! 4. **Ceiling**: past [`TURN_CEILING`] turns a "still debating" verdict is
//!    overridden and the debate concludes.
//!
//! A classifier failure concludes the debate past the ceiling and continues
//! it otherwise. Once concluded, the exit is resolved from the classifier's
//! hint, then by a second query over the scene transcript, and finally by
//! falling back to the first declared exit.

use crate::content::Exit;
use crate::conversation::HistoryEvent;
use crate::gateway::Gateway;
use crate::prompts;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// First turn at which the router may conclude a debate.
pub const DECISION_GATE: usize = 4;

/// Turn count past which the debate is forced to conclude.
pub const TURN_CEILING: usize = 6;

/// Turn count past which the classifier runs in lenient mode.
pub const LENIENT_AFTER: usize = 8;

/// Exit id the classifier uses for "no exit yet".
pub const CONTINUE_MARKER: &str = "CONTINUE";

lazy_static::lazy_static! {
    /// Phrases that settle the debate wherever they appear in an utterance.
    static ref AFFIRMATION_PHRASES: Vec<String> = [
        "je suis sûr",
        "je suis sûre",
        "j'en suis sûr",
        "j'en suis sûre",
        "c'est décidé",
        "ma décision est prise",
        "je choisis",
        "je décide",
        "allons-y",
        "faites-le",
        "on y va",
        "i'm sure",
        "i am sure",
        "i agree",
        "do it",
        "let's go",
    ]
    .iter()
    .map(|p| normalize(p))
    .collect();

    /// Short replies that settle the debate only when they are the whole utterance.
    static ref AFFIRMATION_REPLIES: HashSet<String> = [
        "oui",
        "d'accord",
        "ok",
        "entendu",
        "validé",
        "yes",
        "agreed",
    ]
    .iter()
    .map(|p| normalize(p))
    .collect();

    /// Time markers that turn a phrase like "je décide" into a deferral.
    static ref DEFERRALS: Vec<String> = [
        "demain",
        "après-demain",
        "plus tard",
        "bientôt",
        "la semaine prochaine",
        "tomorrow",
        "later",
    ]
    .iter()
    .map(|p| normalize(p))
    .collect();
}

/// Whether the debate goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebateStatus {
    Debating,
    Decided,
}

/// Strategy that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    Gate,
    Keyword,
    Classifier,
    Ceiling,
    /// The classifier failed; the turn-count rule decided.
    Fallback,
}

/// Router verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub status: DebateStatus,
    /// Resolved exit; `None` when debating or when the scene has no exits.
    pub exit_id: Option<String>,
    pub basis: Basis,
}

impl Decision {
    fn debating(basis: Basis) -> Self {
        Self {
            status: DebateStatus::Debating,
            exit_id: None,
            basis,
        }
    }

    fn decided(exit_id: Option<String>, basis: Basis) -> Self {
        Self {
            status: DebateStatus::Decided,
            exit_id,
            basis,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.status == DebateStatus::Decided
    }
}

/// How eager the classifier is to call a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leniency {
    Strict,
    Lenient,
}

impl Leniency {
    pub fn for_turn(turn: usize) -> Self {
        if turn > LENIENT_AFTER {
            Leniency::Lenient
        } else {
            Leniency::Strict
        }
    }
}

impl fmt::Display for Leniency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leniency::Strict => f.write_str("STRICT"),
            Leniency::Lenient => f.write_str("TRÈS INDULGENT"),
        }
    }
}

/// Everything the router looks at. Borrowed from the play context.
#[derive(Debug, Clone, Copy)]
pub struct DecisionQuery<'a> {
    pub utterance: &'a str,
    pub theme: &'a str,
    /// Player turns with the active persona, the current one included.
    pub turn: usize,
    pub exits: &'a [Exit],
    pub last_reply: Option<&'a str>,
    /// Scene-scoped slice of the global history.
    pub transcript: &'a [&'a HistoryEvent],
}

#[derive(Debug, Error)]
enum ClassificationError {
    #[error("generation service unavailable")]
    Unavailable,

    #[error("malformed classifier output: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct ClassifierReply {
    status: DebateStatus,
    #[serde(default, rename = "exitId")]
    exit_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InferenceReply {
    #[serde(rename = "exitId")]
    exit_id: String,
}

/// Classifies end-of-scene and resolves the branch to take.
#[derive(Clone)]
pub struct DecisionRouter {
    gateway: Gateway,
}

impl DecisionRouter {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Run the strategy chain. Never fails: every error has a fallback.
    pub async fn decide(&self, query: &DecisionQuery<'_>) -> Decision {
        if query.turn < DECISION_GATE {
            return Decision::debating(Basis::Gate);
        }

        if is_affirmation(query.utterance) {
            tracing::debug!(turn = query.turn, "affirmation keyword matched");
            let exit = self.resolve_exit(query, None).await;
            return self.log(Decision::decided(exit, Basis::Keyword), query);
        }

        let decision = match self.classify(query).await {
            Ok(reply) if reply.status == DebateStatus::Decided => {
                let exit = self.resolve_exit(query, reply.exit_id.as_deref()).await;
                Decision::decided(exit, Basis::Classifier)
            }
            Ok(reply) if query.turn > TURN_CEILING => {
                let exit = self.resolve_exit(query, reply.exit_id.as_deref()).await;
                Decision::decided(exit, Basis::Ceiling)
            }
            Ok(_) => Decision::debating(Basis::Classifier),
            Err(e) => {
                tracing::warn!(turn = query.turn, error = %e, "decision classification failed");
                if query.turn > TURN_CEILING {
                    let exit = self.resolve_exit(query, None).await;
                    Decision::decided(exit, Basis::Fallback)
                } else {
                    Decision::debating(Basis::Fallback)
                }
            }
        };
        self.log(decision, query)
    }

    async fn classify(&self, query: &DecisionQuery<'_>) -> Result<ClassifierReply, ClassificationError> {
        let leniency = Leniency::for_turn(query.turn);
        let prompt = prompts::classification(query, leniency);
        let text = self
            .gateway
            .oneshot(&prompt)
            .await
            .into_text()
            .ok_or(ClassificationError::Unavailable)?;

        serde_json::from_str(extract_json(&text))
            .map_err(|e| ClassificationError::Malformed(format!("{e}: {text}")))
    }

    /// Pick the exit of a concluded debate.
    ///
    /// A hint naming a declared exit wins. A hint naming an unknown exit falls
    /// straight back to the first exit. Without a hint, the scene transcript
    /// is sent for inference.
    async fn resolve_exit(&self, query: &DecisionQuery<'_>, hint: Option<&str>) -> Option<String> {
        let first = query.exits.first()?;

        let hint = hint
            .map(str::trim)
            .filter(|h| !h.is_empty() && !h.eq_ignore_ascii_case(CONTINUE_MARKER));
        if let Some(hint) = hint {
            return match match_exit(query.exits, hint) {
                Some(exit) => Some(exit.id.clone()),
                None => {
                    tracing::warn!(exit = %hint, fallback = %first.id, "classifier named an undeclared exit");
                    Some(first.id.clone())
                }
            };
        }

        match self.infer_exit(query).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, fallback = %first.id, "exit inference failed");
                Some(first.id.clone())
            }
        }
    }

    async fn infer_exit(&self, query: &DecisionQuery<'_>) -> Result<String, ClassificationError> {
        let prompt = prompts::exit_inference(query);
        let text = self
            .gateway
            .oneshot(&prompt)
            .await
            .into_text()
            .ok_or(ClassificationError::Unavailable)?;

        let reply: InferenceReply = serde_json::from_str(extract_json(&text))
            .map_err(|e| ClassificationError::Malformed(format!("{e}: {text}")))?;
        match_exit(query.exits, &reply.exit_id)
            .map(|exit| exit.id.clone())
            .ok_or_else(|| ClassificationError::Malformed(format!("unknown exit '{}'", reply.exit_id)))
    }

    fn log(&self, decision: Decision, query: &DecisionQuery<'_>) -> Decision {
        tracing::info!(
            turn = query.turn,
            status = ?decision.status,
            basis = ?decision.basis,
            exit = decision.exit_id.as_deref().unwrap_or("-"),
            "decision evaluated"
        );
        decision
    }
}

/// Case-insensitive exit lookup.
fn match_exit<'a>(exits: &'a [Exit], id: &str) -> Option<&'a Exit> {
    let id = id.trim();
    exits
        .iter()
        .find(|e| e.id == id)
        .or_else(|| exits.iter().find(|e| e.id.eq_ignore_ascii_case(id)))
}

/// Whether the utterance is an explicit affirmation. Questions never are.
///
/// A phrase does not count when a negation precedes it or a time deferral
/// follows it; those utterances go to the classifier.
pub fn is_affirmation(utterance: &str) -> bool {
    if utterance.trim_end().ends_with('?') {
        return false;
    }
    let normalized = normalize(utterance);
    if AFFIRMATION_REPLIES.contains(&normalized) {
        return true;
    }

    let words: Vec<&str> = normalized.split(' ').collect();
    AFFIRMATION_PHRASES.iter().any(|phrase| {
        let phrase: Vec<&str> = phrase.split(' ').collect();
        words
            .windows(phrase.len())
            .enumerate()
            .any(|(at, window)| {
                window == phrase.as_slice()
                    && !words[..at].iter().any(|w| is_negation(w))
                    && !is_deferred(&words[at + phrase.len()..])
            })
    })
}

fn is_negation(word: &str) -> bool {
    matches!(word, "ne" | "pas" | "jamais" | "not" | "never")
        || word.starts_with("n'")
        || word.ends_with("n't")
}

fn is_deferred(rest: &[&str]) -> bool {
    let padded = format!(" {} ", rest.join(" "));
    DEFERRALS
        .iter()
        .any(|marker| padded.contains(&format!(" {marker} ")))
}

/// Lowercase, fold typographic apostrophes, turn other punctuation into
/// spaces and collapse whitespace.
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '’' => '\'',
            '\'' | '-' => c,
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut the JSON object out of a reply that may carry prose around it.
fn extract_json(text: &str) -> &str {
    let text = text.trim();
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SceneGraph;
    use crate::gateway::GatewayConfig;
    use crate::testing::{ScriptedGenerator, SAMPLE_SCENARIO};
    use std::sync::Arc;

    fn router(generator: &Arc<ScriptedGenerator>) -> DecisionRouter {
        DecisionRouter::new(Gateway::new(generator.clone(), GatewayConfig::new()))
    }

    fn mine_exits() -> Vec<Exit> {
        let graph = SceneGraph::from_json(SAMPLE_SCENARIO).unwrap();
        graph.get("level_3").unwrap().exits.clone()
    }

    fn query<'a>(utterance: &'a str, turn: usize, exits: &'a [Exit]) -> DecisionQuery<'a> {
        DecisionQuery {
            utterance,
            theme: "Une colonie minière menacée",
            turn,
            exits,
            last_reply: Some("Que décidez-vous ?"),
            transcript: &[],
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Je suis SÛR, on extrait ! "), "je suis sûr on extrait");
        assert_eq!(normalize("D’accord."), "d'accord");
    }

    #[test]
    fn test_is_affirmation() {
        assert!(is_affirmation("Je suis sûr, on extrait."));
        assert!(is_affirmation("Bon. C'est décidé : on protège."));
        assert!(is_affirmation("Oui."));
        assert!(is_affirmation("Allons-y"));
        assert!(!is_affirmation("Oui, mais les mineurs ont-ils été prévenus"));
        assert!(!is_affirmation("Je suis sûr ?"));
        assert!(!is_affirmation("Je me demande ce que pensent les habitants."));
        // Word boundaries hold
        assert!(!is_affirmation("Je choisissais toujours la prudence."));
    }

    #[test]
    fn test_refusals_and_hesitations_are_not_affirmations() {
        assert!(!is_affirmation("Non."));
        assert!(!is_affirmation("No"));
        assert!(!is_affirmation(
            "Je suis sur le point de changer d'avis, laissez-moi réfléchir."
        ));
        assert!(!is_affirmation("Je ne suis pas prêt, je décide demain."));
        assert!(!is_affirmation("Je choisis plus tard."));
        assert!(!is_affirmation("Je n'en suis pas sûr."));
        assert!(!is_affirmation("I don't agree."));
        // A negation after the phrase does not cancel it
        assert!(is_affirmation("Je suis sûr, on ne touche pas à la mine."));
        assert!(is_affirmation("Je choisis de protéger la vallée."));
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(
            extract_json("Voici : {\"status\": \"DECIDED\"} voilà"),
            "{\"status\": \"DECIDED\"}"
        );
        assert_eq!(extract_json("DEBATING"), "DEBATING");
    }

    #[test]
    fn test_leniency_for_turn() {
        assert_eq!(Leniency::for_turn(4), Leniency::Strict);
        assert_eq!(Leniency::for_turn(8), Leniency::Strict);
        assert_eq!(Leniency::for_turn(9), Leniency::Lenient);
    }

    #[test]
    fn test_match_exit_case_insensitive() {
        let exits = mine_exits();
        assert_eq!(match_exit(&exits, "extract").unwrap().id, "EXTRACT");
        assert_eq!(match_exit(&exits, " PROTECT ").unwrap().id, "PROTECT");
        assert!(match_exit(&exits, "FLEE").is_none());
    }

    #[tokio::test]
    async fn test_gate_holds_below_four() {
        let generator = Arc::new(ScriptedGenerator::new());
        let router = router(&generator);
        let exits = mine_exits();

        for turn in 0..DECISION_GATE {
            let decision = router.decide(&query("Je suis sûr, on extrait.", turn, &exits)).await;
            assert_eq!(decision.status, DebateStatus::Debating);
            assert_eq!(decision.basis, Basis::Gate);
        }
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_refusal_goes_to_classifier() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            r#"{"status": "DEBATING", "exitId": "CONTINUE"}"#,
            r#"{"status": "DEBATING", "exitId": "CONTINUE"}"#,
            r#"{"status": "DEBATING", "exitId": "CONTINUE"}"#,
        ]));
        let router = router(&generator);
        let exits = mine_exits();

        for text in [
            "Non.",
            "Je suis sur le point de changer d'avis, laissez-moi réfléchir.",
            "Je ne suis pas prêt, je décide demain.",
        ] {
            let decision = router.decide(&query(text, 4, &exits)).await;
            assert_eq!(decision.status, DebateStatus::Debating, "'{text}' should keep the debate open");
            assert_eq!(decision.basis, Basis::Classifier);
        }
        assert_eq!(generator.call_count(), 3);
        assert_eq!(generator.remaining(), 0);
    }

    #[tokio::test]
    async fn test_keyword_then_inference() {
        let generator = Arc::new(ScriptedGenerator::with_replies([r#"{"exitId": "EXTRACT"}"#]));
        let exits = mine_exits();

        let decision = router(&generator)
            .decide(&query("Je suis sûr, on extrait.", 5, &exits))
            .await;

        assert_eq!(decision.status, DebateStatus::Decided);
        assert_eq!(decision.exit_id.as_deref(), Some("EXTRACT"));
        assert_eq!(decision.basis, Basis::Keyword);
        // Only the inference call, no classification
        assert_eq!(generator.call_count(), 1);
        assert!(generator.calls()[0].system.contains("TRANSCRIPTION"));
    }

    #[tokio::test]
    async fn test_classifier_invalid_exit_uses_first() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            r#"{"status": "DECIDED", "exitId": "SURRENDER"}"#,
        ]));
        let exits = mine_exits();

        let decision = router(&generator)
            .decide(&query("Il faut trancher maintenant.", 5, &exits))
            .await;

        assert!(decision.is_decided());
        assert_eq!(decision.exit_id.as_deref(), Some("PROTECT"));
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_classifier_exit_hint_used() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            "```json\n{\"status\": \"DECIDED\", \"exitId\": \"extract\"}\n```",
        ]));
        let exits = mine_exits();

        let decision = router(&generator)
            .decide(&query("Le minerai passe avant tout.", 6, &exits))
            .await;

        assert_eq!(decision.exit_id.as_deref(), Some("EXTRACT"));
        assert_eq!(decision.basis, Basis::Classifier);
    }

    #[tokio::test]
    async fn test_inference_failure_uses_first_exit() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            r#"{"status": "DECIDED", "exitId": "CONTINUE"}"#,
            r#"{"exitId": "NOWHERE"}"#,
        ]));
        let exits = mine_exits();

        let decision = router(&generator)
            .decide(&query("Très bien, tranchons.", 5, &exits))
            .await;

        assert_eq!(decision.exit_id.as_deref(), Some("PROTECT"));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_output_fallback_by_turn() {
        let exits = mine_exits();

        // Past the ceiling: decided, exit inference also fails on the exhausted script
        let generator = Arc::new(ScriptedGenerator::with_replies(["pas du json", "toujours pas"]));
        let decision = router(&generator).decide(&query("Hmm.", 7, &exits)).await;
        assert!(decision.is_decided());
        assert_eq!(decision.basis, Basis::Fallback);
        assert_eq!(decision.exit_id.as_deref(), Some("PROTECT"));

        let generator = Arc::new(ScriptedGenerator::with_replies(["pas du json"]));
        let decision = router(&generator).decide(&query("Hmm.", 5, &exits)).await;
        assert_eq!(decision.status, DebateStatus::Debating);
        assert_eq!(decision.basis, Basis::Fallback);
    }

    #[tokio::test]
    async fn test_ceiling_overrides_debating() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            r#"{"status": "DEBATING", "exitId": "CONTINUE"}"#,
            r#"{"exitId": "PROTECT"}"#,
        ]));
        let exits = mine_exits();

        let decision = router(&generator)
            .decide(&query("Et les familles des mineurs ?", 7, &exits))
            .await;

        assert!(decision.is_decided());
        assert_eq!(decision.basis, Basis::Ceiling);
        assert_eq!(decision.exit_id.as_deref(), Some("PROTECT"));
    }

    #[tokio::test]
    async fn test_no_exits_skips_inference() {
        let generator = Arc::new(ScriptedGenerator::new());
        let decision = router(&generator).decide(&query("C'est décidé.", 4, &[])).await;

        assert!(decision.is_decided());
        assert_eq!(decision.exit_id, None);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_vague_turn_four_keeps_debating() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            r#"{"status": "DEBATING", "exitId": "CONTINUE"}"#,
        ]));
        let exits = mine_exits();

        let decision = router(&generator)
            .decide(&query("Je ne sais pas trop, c'est compliqué.", 4, &exits))
            .await;

        assert_eq!(decision.status, DebateStatus::Debating);
        assert_eq!(decision.basis, Basis::Classifier);
        assert!(generator.calls()[0].system.contains("STRICT"));
    }
}
