//! System prompts sent to the generation service.
//!
//! Static instruction blocks live in `prompts/*.txt`; the builders here
//! splice them together with the scene, persona and transcript data.

use crate::content::{Persona, Scene};
use crate::conversation::{GlobalHistory, HistoryEvent};
use crate::decision::{DecisionQuery, Leniency, CONTINUE_MARKER};
use crate::profile::PlayerProfile;
use crate::selector::Candidate;
use std::fmt::Write;

/// Turn from which personas are told to demand a decision.
pub const LATE_GAME_TURN: usize = 5;

/// Greeting of a persona entering the conversation.
pub fn greeting(persona: &Persona, scene: &Scene) -> String {
    let plan = match scene.steps() {
        Some(steps) => steps.to_string(),
        None => "Improvise à partir du thème".to_string(),
    };

    let mut prompt = format!(
        "RÔLE : {} ({}).\n\nSCÉNARIO : \"{}\".\nPLAN NARRATIF : {}.\n",
        persona.name,
        persona.role,
        scene.context(),
        plan
    );
    if !persona.bio.is_empty() {
        let _ = writeln!(prompt, "BIOGRAPHIE : {}", persona.bio);
    }

    prompt.push('\n');
    prompt.push_str(include_str!("prompts/intro_mission.txt"));
    prompt.push('\n');
    prompt.push_str(include_str!("prompts/beat_format.txt"));
    prompt
}

/// Persona reply to the player's latest utterance.
pub fn debate(
    persona: &Persona,
    scene: &Scene,
    cast: &[&Persona],
    utterance: &str,
    turn: usize,
) -> String {
    let others: Vec<&str> = cast.iter().map(|p| p.name.as_str()).collect();

    let mut prompt = format!(
        "CONTEXTE : Le joueur a dit : \"{}\".\nSCÉNARIO : \"{}\".\nRÔLE ACTUEL : {} ({}).\nAUTRES PERSOS PRÉSENTS : {}.\n",
        utterance,
        scene.theme,
        persona.display_name(),
        persona.bio,
        others.join(", ")
    );
    if let Some(agenda) = &persona.secret_agenda {
        let _ = writeln!(
            prompt,
            "MOTIVATION SECRÈTE (ne la révèle jamais directement) : {agenda}"
        );
    }

    prompt.push('\n');
    prompt.push_str(include_str!("prompts/debate_rules.txt"));
    if turn >= LATE_GAME_TURN {
        prompt.push_str("- C'est la fin du temps imparti. Exige une décision.\n");
    } else {
        prompt.push_str("- Continue de creuser la position du joueur.\n");
    }

    prompt.push('\n');
    prompt.push_str(include_str!("prompts/beat_format.txt"));
    prompt
}

/// Classifier query: has the player concluded, and on which exit?
pub fn classification(query: &DecisionQuery<'_>, leniency: Leniency) -> String {
    let mut prompt = format!(
        "ANALYSE DE LA RÉPONSE DU JOUEUR. Thème : \"{}\". Réponse : \"{}\".\nMode : {}\n",
        query.theme, query.utterance, leniency
    );
    if let Some(last) = query.last_reply {
        let _ = writeln!(prompt, "Dernière réplique du personnage : \"{last}\"");
    }

    prompt.push('\n');
    prompt.push_str(include_str!("prompts/decision_rules.txt"));

    if query.exits.is_empty() {
        prompt.push_str("\nRéponds UNIQUEMENT en JSON : { \"status\": \"DECIDED\" | \"DEBATING\" }\n");
    } else {
        prompt.push_str("\nISSUES POSSIBLES :\n");
        prompt.push_str(&format_exits(query));
        let _ = write!(
            prompt,
            "\nRéponds UNIQUEMENT en JSON : {{ \"status\": \"DECIDED\" | \"DEBATING\", \"exitId\": <un id ci-dessus ou \"{CONTINUE_MARKER}\"> }}\n"
        );
    }
    prompt
}

/// Second-pass query matching the player's cumulative stance to an exit.
pub fn exit_inference(query: &DecisionQuery<'_>) -> String {
    let mut prompt = format!("SCÉNARIO : \"{}\".\n\n", query.theme);
    prompt.push_str(include_str!("prompts/exit_inference.txt"));
    prompt.push_str("\nISSUES :\n");
    prompt.push_str(&format_exits(query));
    prompt.push_str("\nTRANSCRIPTION :\n");
    prompt.push_str(&format_transcript(query.transcript.iter().copied()));
    prompt.push_str("\nRéponds UNIQUEMENT en JSON : { \"exitId\": \"<id>\" }\n");
    prompt
}

/// Rewrite of the rolling player summary after a concluded scene.
pub fn profile_update(prior: &str, theme: &str, transcript: &[&HistoryEvent]) -> String {
    let mut prompt = format!(
        "SUIVI DES CHOIX DU JOUEUR.\nANCIEN PROFIL : \"{prior}\"\nTRANSCRIPTION SCÉNARIO \"{theme}\" :\n"
    );
    prompt.push_str(&format_transcript(transcript.iter().copied()));
    prompt.push('\n');
    prompt.push_str(include_str!("prompts/profile_task.txt"));
    prompt
}

/// Next-scene recommendation among unplayed candidates.
pub fn scene_selection(profile: &PlayerProfile, played_count: usize, candidates: &[Candidate]) -> String {
    let mut prompt = format!(
        "MAÎTRE DU JEU.\nProfil joueur : \"{}\".\nScénarios déjà joués : {}.\n\nOptions disponibles :\n",
        profile.summary(),
        played_count
    );
    for candidate in candidates {
        let _ = writeln!(prompt, "- {} : {}", candidate.id, candidate.theme);
    }
    prompt.push('\n');
    prompt.push_str(include_str!("prompts/scene_selection.txt"));
    prompt
}

/// End-of-run interpretive synthesis over the whole history.
pub fn run_report(history: &GlobalHistory, profile: &PlayerProfile) -> String {
    let mut prompt = String::from("RÔLE : OBSERVATEUR ANALYTIQUE.\n");
    let _ = writeln!(prompt, "PROFIL FINAL : \"{}\"", profile.summary());
    prompt.push_str("TRANSCRIPTION COMPLÈTE DE LA SESSION :\n");

    let mut scene = None;
    for event in history.events() {
        if scene != Some(&event.scene_id) {
            let _ = writeln!(prompt, "== {} ==", event.scene_id);
            scene = Some(&event.scene_id);
        }
        let _ = writeln!(prompt, "[{}] {}", event.speaker_name, event.content);
    }

    prompt.push('\n');
    prompt.push_str(include_str!("prompts/run_report.txt"));
    prompt
}

/// One `[Speaker] content` line per event.
pub fn format_transcript<'a>(events: impl IntoIterator<Item = &'a HistoryEvent>) -> String {
    let mut out = String::new();
    for event in events {
        let _ = writeln!(out, "[{}] {}", event.speaker_name, event.content);
    }
    out
}

fn format_exits(query: &DecisionQuery<'_>) -> String {
    let mut out = String::new();
    for exit in query.exits {
        let _ = writeln!(out, "- {} : {}", exit.id, exit.description);
    }
    out
}
