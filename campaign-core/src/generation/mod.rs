//! The generation port.
//!
//! The engine talks to a text-generation capability through
//! [`GenerationService`]. [`GenerationClient`] wraps a service with schema
//! validation and the single-retry policy; [`ClaudeGenerator`] is the
//! production adapter.

mod claude_adapter;
mod client;
pub mod outputs;
pub mod schema;

pub use claude_adapter::{extract_json, ClaudeGenerator};
pub use client::GenerationClient;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Transport or service failure.
    #[error("generation service unavailable: {0}")]
    Unavailable(String),

    /// The reply did not have the requested shape.
    #[error("malformed output: {0}")]
    MalformedOutput(String),

    /// The service refused the request itself (bad request, missing key).
    /// Sending it again would fail the same way.
    #[error("generation request rejected: {0}")]
    Rejected(String),
}

impl GenerationError {
    /// Both variants get one retry with the same prompt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Unavailable(_) | GenerationError::MalformedOutput(_)
        )
    }
}

impl From<claude::Error> for GenerationError {
    fn from(err: claude::Error) -> Self {
        match err {
            claude::Error::Parse(msg) => GenerationError::MalformedOutput(msg),
            transport if transport.is_transport() => {
                GenerationError::Unavailable(transport.to_string())
            }
            other => GenerationError::Rejected(other.to_string()),
        }
    }
}

/// Which system prompt frames a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemRole {
    /// Writes GM-only campaign content.
    GameDesigner,
    /// Runs the game and speaks to players.
    GameMaster,
    /// Compresses log entries.
    Summarizer,
}

impl SystemRole {
    pub fn name(&self) -> &'static str {
        match self {
            SystemRole::GameDesigner => "game_designer",
            SystemRole::GameMaster => "game_master",
            SystemRole::Summarizer => "summarizer",
        }
    }

    /// The full system prompt for this role.
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::new();
        match self {
            SystemRole::GameDesigner => {
                prompt.push_str(include_str!("../prompts/game_designer.txt"));
                prompt.push('\n');
                prompt.push_str(include_str!("../prompts/definitions.txt"));
            }
            SystemRole::GameMaster => {
                prompt.push_str(include_str!("../prompts/game_master.txt"));
                prompt.push('\n');
                prompt.push_str(include_str!("../prompts/definitions.txt"));
            }
            SystemRole::Summarizer => {
                prompt.push_str(include_str!("../prompts/summarizer.txt"));
            }
        }
        prompt
    }
}

/// Shape a structured reply must have.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl OutputSpec {
    pub fn of<T: claude::OutputSchema>() -> Self {
        Self {
            name: T::schema_name().to_string(),
            description: T::schema_description().to_string(),
            schema: T::schema(),
        }
    }
}

/// Whether a call wants creative prose or a precise structured answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Temperature {
    #[default]
    Creative,
    Precise,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub role: SystemRole,
    pub prompt: String,
    pub output: Option<OutputSpec>,
    pub temperature: Temperature,
}

impl GenerationRequest {
    pub fn text(role: SystemRole, prompt: impl Into<String>) -> Self {
        Self {
            role,
            prompt: prompt.into(),
            output: None,
            temperature: Temperature::Creative,
        }
    }

    pub fn structured(role: SystemRole, prompt: impl Into<String>, output: OutputSpec) -> Self {
        Self {
            role,
            prompt: prompt.into(),
            output: Some(output),
            temperature: Temperature::Precise,
        }
    }
}

/// Raw reply from a service.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    Structured(Value),
}

impl Completion {
    pub fn into_text(self) -> String {
        match self {
            Completion::Text(text) => text,
            Completion::Structured(value) => value.to_string(),
        }
    }
}

/// A text-generation capability.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn complete(&self, request: GenerationRequest) -> Result<Completion, GenerationError>;
}
