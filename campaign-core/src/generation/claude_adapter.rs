use super::{Completion, GenerationError, GenerationRequest, GenerationService, Temperature};
use crate::config::GenerationConfig;
use async_trait::async_trait;
use claude::{Claude, ToolChoice};
use std::time::Duration;
use tracing::debug;

/// [`GenerationService`] backed by the Anthropic Messages API.
///
/// Structured requests force a single tool call whose input schema is the
/// requested output schema. If the model answers in prose anyway the text is
/// passed on and JSON is extracted from it downstream.
pub struct ClaudeGenerator {
    claude: Claude,
    config: GenerationConfig,
}

impl ClaudeGenerator {
    pub fn new(claude: Claude, config: GenerationConfig) -> Self {
        let claude = claude.with_model(config.model.clone());
        Self { claude, config }
    }

    /// Build a client from `ANTHROPIC_API_KEY` and the given settings.
    pub fn from_env(config: GenerationConfig) -> Result<Self, claude::Error> {
        let mut claude = Claude::from_env()?
            .with_timeout(Duration::from_secs(config.request_timeout_secs))?;
        if let Some(base) = &config.api_base {
            claude = claude.with_base_url(base.clone());
        }
        Ok(Self::new(claude, config))
    }

    fn temperature(&self, hint: Temperature) -> f32 {
        let value = match hint {
            Temperature::Creative => self.config.creative_temperature,
            Temperature::Precise => self.config.structured_temperature,
        };
        value.clamp(0.0, 1.0)
    }
}

#[async_trait]
impl GenerationService for ClaudeGenerator {
    async fn complete(&self, request: GenerationRequest) -> Result<Completion, GenerationError> {
        let mut api_request = claude::Request::new(vec![claude::Message::user(request.prompt)])
            .with_max_tokens(self.config.max_tokens as usize)
            .with_system(request.role.system_prompt())
            .with_temperature(self.temperature(request.temperature));

        let Some(spec) = request.output else {
            let response = self.claude.complete(api_request).await?;
            return Ok(Completion::Text(response.text()));
        };

        let tool_name = spec.name.clone();
        api_request = api_request
            .with_tools(vec![claude::Tool {
                name: spec.name,
                description: spec.description,
                input_schema: spec.schema,
            }])
            .with_tool_choice(ToolChoice::Tool {
                name: tool_name.clone(),
            });

        let response = self.claude.complete(api_request).await?;
        structured_reply(&response, &tool_name)
    }
}

/// Tool input of a forced call, or the prose reply to extract JSON from.
/// A reply cut off at the token limit is never complete JSON.
fn structured_reply(
    response: &claude::Response,
    tool_name: &str,
) -> Result<Completion, GenerationError> {
    if response.hit_token_limit() {
        return Err(GenerationError::MalformedOutput(format!(
            "{tool_name}: reply truncated at the token limit"
        )));
    }
    match response.tool_input(tool_name) {
        Some(input) => Ok(Completion::Structured(input.clone())),
        None => {
            debug!(tool = %tool_name, "model answered without the forced tool call");
            Ok(Completion::Text(response.text()))
        }
    }
}

/// Pull a JSON document out of a prose reply.
///
/// Handles ```json fenced blocks, bare fences, and objects embedded in
/// surrounding text.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }

    text
}
