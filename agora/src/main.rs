//! Agora headless front end.
//!
//! Plays a scenario over a line protocol on stdin/stdout:
//!
//! ```bash
//! cargo run -p agora -- --scenario scenario.json --personas personas.json
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` to change the filter.

mod headless;

use agora_core::{DebateSession, SessionConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agora", about = "Play a branching Socratic debate in the terminal")]
struct Args {
    /// Scenario document (scene map keyed by scene id)
    #[arg(long, default_value = "scenario.json")]
    scenario: PathBuf,

    /// Persona registry document
    #[arg(long, default_value = "personas.json")]
    personas: PathBuf,

    /// Scene to enter instead of the scenario's start scene
    #[arg(long)]
    start: Option<String>,

    /// Generation service base URL (overrides AGORA_API_BASE)
    #[arg(long)]
    api_base: Option<String>,

    /// Primary model (overrides AGORA_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Model used for the single retry (overrides AGORA_FALLBACK_MODEL)
    #[arg(long)]
    fallback_model: Option<String>,

    /// Skip the guided tour of secondary characters
    #[arg(long)]
    no_tour: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::from_env();
        if let Some(base) = &self.api_base {
            config = config.with_api_base(base.clone());
        }
        if let Some(model) = &self.model {
            config.gateway = config.gateway.with_model(model.clone());
        }
        if let Some(model) = &self.fallback_model {
            config.gateway = config.gateway.with_fallback_model(model.clone());
        }
        if self.no_tour {
            config.engine = config.engine.with_guided_tour(false);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=info,agora_core=info".into()),
        )
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "starting");

    let session = match DebateSession::open(&args.scenario, &args.personas, args.session_config()).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to open scenario: {e}");
            std::process::exit(1);
        }
    };

    headless::run_headless(session, args.start.as_deref()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "agora",
            "--api-base",
            "http://localhost:9000/api",
            "--model",
            "primary",
            "--fallback-model",
            "backup",
            "--no-tour",
        ]);
        let config = args.session_config();

        assert_eq!(config.api_base.as_deref(), Some("http://localhost:9000/api"));
        assert_eq!(config.gateway.model, "primary");
        assert_eq!(config.gateway.fallback_model, "backup");
        assert!(!config.engine.guided_tour);
    }

    #[test]
    fn test_default_paths() {
        let args = Args::parse_from(["agora"]);
        assert_eq!(args.scenario, PathBuf::from("scenario.json"));
        assert_eq!(args.personas, PathBuf::from("personas.json"));
        assert!(args.start.is_none());
        assert!(!args.no_tour);
    }
}
