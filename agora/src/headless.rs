//! Headless mode for the debate game.
//!
//! A line-oriented protocol over stdin/stdout, suited to scripted play and
//! automated testing.

use agora_core::{
    Beat, BeatKind, DebateSession, EngineError, Greeting, PersonaId, Reply, SceneEntry,
    SessionError, Stage, TourStep, Transition, TurnOutcome,
};
use std::io::{self, BufRead, Write};

const HELP: &[(&str, &str)] = &[
    ("#next", "Meet the next character of the tour"),
    ("#talk <persona>", "Talk to another character of the scene"),
    ("#back", "Return to the main character"),
    ("#jump <scene>", "Jump to a scene (accepts numeric shorthand)"),
    ("#profile", "Show the player profile"),
    ("#status", "Show the current scene and stage"),
    ("#help", "Show this help"),
    ("#quit", "Exit the game"),
];

/// One line of player input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command<'a> {
    Say(&'a str),
    Next,
    Talk(&'a str),
    Back,
    Jump(&'a str),
    Profile,
    Status,
    Help,
    Quit,
    /// A known command missing its argument.
    Usage(&'static str),
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// `None` for blank lines.
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('#') else {
            return Some(Command::Say(line));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let command = match name {
            "next" => Command::Next,
            "talk" if arg.is_empty() => Command::Usage("#talk <persona>"),
            "talk" => Command::Talk(arg),
            "back" => Command::Back,
            "jump" if arg.is_empty() => Command::Usage("#jump <scene>"),
            "jump" => Command::Jump(arg),
            "profile" => Command::Profile,
            "status" => Command::Status,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => Command::Unknown(other),
        };
        Some(command)
    }
}

/// Render one beat: `[Name] text` for dialogue, `* text *` for narration.
fn format_beat(speaker: &str, beat: &Beat) -> String {
    match beat.kind {
        BeatKind::Dialogue => format!("[{speaker}] {}", beat.text),
        BeatKind::Narration => format_narration(&beat.text),
    }
}

fn format_narration(text: &str) -> String {
    let inner = text.trim().trim_matches('*').trim();
    format!("* {inner} *")
}

fn print_reply(reply: &Reply) {
    for beat in &reply.beats {
        println!("{}", format_beat(&reply.speaker, beat));
    }
    println!();
}

fn print_greeting(session: &DebateSession, persona: &PersonaId, greeting: &Greeting) {
    match greeting {
        Greeting::Delivered(reply) => print_reply(reply),
        Greeting::Replayed => {
            for message in session.messages(persona) {
                match (&message.speaker, message.narration) {
                    (Some(speaker), false) => println!("[{speaker}] {}", message.text),
                    _ => println!("{}", format_narration(&message.text)),
                }
            }
            println!();
        }
        Greeting::Unavailable => println!("[SILENCE] {persona} does not answer.\n"),
    }
}

fn print_entry(session: &DebateSession, entry: &SceneEntry) {
    println!("=== {} ===", entry.scene);
    if !entry.narration.trim().trim_matches('*').trim().is_empty() {
        println!("{}", format_narration(&entry.narration));
        println!();
    }
    print_greeting(session, &entry.target, &entry.greeting);
    if entry.tour_pending > 0 {
        println!(
            "[TOUR] {} other character(s) to meet. Type #next to continue.",
            entry.tour_pending
        );
    }
}

fn print_tour_step(session: &DebateSession, step: Option<&TourStep>) {
    match step {
        Some(step) => {
            print_greeting(session, &step.persona, &step.greeting);
            if step.remaining > 0 {
                println!("[TOUR] {} remaining. Type #next to continue.", step.remaining);
            } else {
                println!("[TOUR] Last one. Type #next to open the debate.");
            }
        }
        None => {
            let name = session
                .target_persona()
                .map(|p| p.display_name())
                .unwrap_or_default();
            println!("[DEBATE] The floor is yours. You are talking to {name}.");
        }
    }
}

fn print_status(session: &DebateSession) {
    let ctx = session.context();
    println!("[STATUS]");
    match ctx.current_scene() {
        Some(scene) => println!("  Scene: {scene}"),
        None => println!("  Scene: (none)"),
    }
    println!("  Stage: {}", ctx.stage());
    if let Some(persona) = session.target_persona() {
        println!("  Talking to: {} [{}]", persona.display_name(), persona.id);
    }
    println!("  Turns: {}", ctx.turn_count());
    println!("  Scenes played: {}", ctx.played().len());
    let cast: Vec<String> = session
        .active_personas()
        .iter()
        .map(|p| format!("{} [{}]", p.name, p.id))
        .collect();
    if !cast.is_empty() {
        println!("  Characters: {}", cast.join(", "));
    }
    if let Some(phase) = session.active_phase() {
        println!("  Phase image: {}", phase.image);
    }
}

fn print_profile(session: &DebateSession) {
    let profile = session.profile();
    println!("[PROFILE] {}", profile.summary());
    for (key, value) in profile.traits() {
        println!("  {key}: {value}");
    }
}

async fn print_report(session: &DebateSession) {
    println!("=== END ===");
    match session.run_report().await {
        Some(report) => println!("[REPORT]\n{report}"),
        None => println!("[REPORT] (unavailable)"),
    }
}

/// Print a scene transition; returns true when the run is over.
async fn print_transition(session: &DebateSession, next: &Transition) -> bool {
    match next {
        Transition::Branch { exit_id, entry } => {
            println!("[DECISION] {exit_id}");
            print_entry(session, entry);
            false
        }
        Transition::Next(entry) => {
            print_entry(session, entry);
            false
        }
        Transition::End => {
            print_report(session).await;
            true
        }
    }
}

/// Run a play session over stdin/stdout.
///
/// Protocol:
/// - Lines starting with `#` are commands (see `#help`)
/// - Any other line is said to the current character
/// - Output lines are `[Name] text`, `* narration *`, or bracketed tags
pub async fn run_headless(
    mut session: DebateSession,
    start: Option<&str>,
) -> Result<(), SessionError> {
    println!("=== Agora Headless Mode ===");
    print_help();
    println!();

    let entry = match start {
        Some(scene) => session.load_scene(scene).await?,
        None => session.start().await?,
    };
    print_entry(&session, &entry);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };
        let Some(command) = Command::parse(&line) else {
            continue;
        };

        match command {
            Command::Quit => {
                println!("Goodbye!");
                break;
            }
            Command::Help => print_help(),
            Command::Status => print_status(&session),
            Command::Profile => print_profile(&session),
            Command::Usage(usage) => println!("[ERROR] Usage: {usage}"),
            Command::Unknown(name) => {
                println!("[ERROR] Unknown command #{name}. Type #help for help.")
            }
            Command::Next => match session.advance_tour().await {
                Ok(step) => print_tour_step(&session, step.as_ref()),
                Err(e) => println!("[ERROR] {e}"),
            },
            Command::Talk(id) => {
                let persona = PersonaId::new(id);
                match session.select_persona(&persona).await {
                    Ok(greeting) => print_greeting(&session, &persona, &greeting),
                    Err(e) => println!("[ERROR] {e}"),
                }
            }
            Command::Back => match session.return_to_default() {
                Ok(persona) => println!("[TALK] Back to {persona}."),
                Err(e) => println!("[ERROR] {e}"),
            },
            Command::Jump(scene) => match session.jump_to_scene(scene).await {
                Ok(entry) => print_entry(&session, &entry),
                Err(e) => println!("[ERROR] {e}"),
            },
            Command::Say(text) => {
                if session.is_over() {
                    println!("[ERROR] The run is over. Type #quit to exit.");
                    stdout.flush().ok();
                    continue;
                }
                print!("[THINKING]");
                stdout.flush().ok();
                let outcome = session.submit_player_utterance(text).await;
                print!("\r          \r");
                stdout.flush().ok();

                match outcome {
                    Ok(TurnOutcome::Replied(reply)) => print_reply(&reply),
                    Ok(TurnOutcome::Unavailable) => {
                        println!("[SILENCE] No answer this time. Try again.\n")
                    }
                    Ok(TurnOutcome::Concluded(conclusion)) => {
                        if conclusion.profile_updated {
                            print_profile(&session);
                        }
                        if print_transition(&session, &conclusion.next).await {
                            println!("Type #quit to exit.");
                        }
                    }
                    Err(EngineError::NotAccepting { stage: Stage::Ended }) => {
                        println!("[ERROR] The run is over. Type #quit to exit.")
                    }
                    Err(e) => println!("[ERROR] {e}"),
                }
            }
        }
        stdout.flush().ok();
    }

    Ok(())
}

fn print_help() {
    println!("[HELP]");
    for (command, text) in HELP {
        println!("  {command:<16} - {text}");
    }
    println!("  (anything else is said to the current character)");
}
