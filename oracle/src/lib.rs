//! Minimal client for the dialogue generation service.
//!
//! The service exposes a single chat endpoint:
//! - `POST {base}/chat` with `{ model, messages, system }`
//! - answers `{ reply }` on success
//!
//! Anything else (non-success status, undecodable body, missing or blank
//! `reply`) is reported as an [`Error`]. Retry policy lives with the caller.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Model the game was tuned against.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const DEFAULT_API_BASE: &str = "http://localhost:3000/api";

/// Errors that can occur when talking to the generation service.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Response carried no reply")]
    EmptyReply,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Generation service client.
#[derive(Clone)]
pub struct Oracle {
    client: reqwest::Client,
    api_base: String,
    model: String,
}

impl Oracle {
    /// Create a client for the service rooted at `api_base`.
    pub fn new(api_base: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        let api_base = api_base.into().trim_end_matches('/').to_string();
        if api_base.is_empty() {
            return Err(Error::Config("empty API base URL".to_string()));
        }

        Ok(Self {
            client,
            api_base,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Create a client from the AGORA_API_BASE environment variable.
    ///
    /// Falls back to a local development server when the variable is unset.
    pub fn from_env() -> Result<Self, Error> {
        let api_base =
            std::env::var("AGORA_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self::new(api_base)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The service root this client talks to.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Send a chat request and return the reply.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let api_request = self.build_api_request(request);
        let model = api_request.model.clone();

        tracing::debug!(
            model = %model,
            messages = api_request.messages.len(),
            system_len = api_request.system.len(),
            "sending chat request"
        );

        let response = self
            .client
            .post(format!("{}/chat", self.api_base))
            .headers(Self::build_headers())
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        parse_reply(&body).map(|reply| Response { model, reply })
    }

    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn build_api_request(&self, request: Request) -> ApiRequest {
        ApiRequest {
            model: request.model.unwrap_or_else(|| self.model.clone()),
            messages: request
                .messages
                .into_iter()
                .map(|m| ApiMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            system: request.system,
        }
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A chat request.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub system: String,
    pub messages: Vec<Message>,
}

impl Request {
    /// Create a request with the given system prompt and no conversation.
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            model: None,
            system: system.into(),
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }
}

/// A message in the conversation window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A successful reply.
#[derive(Debug, Clone)]
pub struct Response {
    /// Model the request was sent to.
    pub model: String,
    /// Raw reply text, unsanitized.
    pub reply: String,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    system: String,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: Role,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    reply: Option<String>,
}

fn parse_reply(body: &str) -> Result<String, Error> {
    let parsed: ApiResponse =
        serde_json::from_str(body).map_err(|e| Error::Parse(e.to_string()))?;

    match parsed.reply {
        Some(reply) if !reply.trim().is_empty() => Ok(reply),
        _ => Err(Error::EmptyReply),
    }
}
