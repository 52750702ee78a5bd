//! Small client for the Anthropic Messages API.
//!
//! Only what the campaign engine needs is here: single-shot completions and
//! structured replies obtained by forcing the model to call one tool whose
//! input schema is the shape we want back. Types that implement
//! [`OutputSchema`] (usually through `#[derive(OutputSchema)]`) turn straight
//! into such a tool.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: usize = 4096;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("ANTHROPIC_API_KEY is not set")]
    NoApiKey,

    #[error("request did not reach the API: {0}")]
    Network(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unusable reply: {0}")]
    Parse(String),

    #[error("client misconfigured: {0}")]
    Config(String),
}

impl Error {
    /// True for failures where no reply was produced at all: dropped
    /// connections, rate limiting and server side errors.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            Error::NoApiKey | Error::Parse(_) | Error::Config(_) => false,
        }
    }
}

/// Describes the JSON shape of a type so the model can be asked for it.
pub trait OutputSchema {
    fn schema_name() -> &'static str;

    /// Taken from the type's doc comment by the derive.
    fn schema_description() -> &'static str;

    fn schema() -> Value;

    /// A tool whose input is one value of this type.
    fn as_tool() -> Tool
    where
        Self: Sized,
    {
        Tool {
            name: Self::schema_name().to_string(),
            description: Self::schema_description().to_string(),
            input_schema: Self::schema(),
        }
    }
}

/// Handle on the Messages endpoint. Cheap to clone.
#[derive(Clone)]
pub struct Claude {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Claude {
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Ok(Self {
            http: http_client(DEFAULT_TIMEOUT)?,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Reads the key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        match std::env::var("ANTHROPIC_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Self::new(key),
            _ => Err(Error::NoApiKey),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Send requests somewhere other than api.anthropic.com.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, Error> {
        self.http = http_client(timeout)?;
        Ok(self)
    }

    /// Model used for requests that leave [`Request::model`] empty.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let body = Envelope {
            model: request.model.as_deref().unwrap_or(&self.model),
            request: &request,
        };

        let reply = self
            .http
            .post(self.endpoint())
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = reply.status();
        if !status.is_success() {
            let message = reply.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        reply
            .json::<Response>()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }

    /// Forces a call to `tool` and hands back its input.
    ///
    /// Replaces whatever tools the request already carried.
    pub async fn complete_structured(&self, request: Request, tool: Tool) -> Result<Value, Error> {
        let name = tool.name.clone();
        let request = request
            .with_tools(vec![tool])
            .with_tool_choice(ToolChoice::Tool { name: name.clone() });
        let response = self.complete(request).await?;

        match response.tool_input(&name) {
            Some(input) => Ok(input.clone()),
            None => Err(Error::Parse(format!(
                "expected a call to '{name}', stop reason was {:?}",
                response.stop_reason
            ))),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    fn headers(&self) -> Result<HeaderMap, Error> {
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| Error::Config("API key contains characters not allowed in a header".into()))?;

        let mut headers = HeaderMap::with_capacity(3);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert("x-api-key", key);
        Ok(headers)
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(e.to_string()))
}

/// Request body as sent on the wire, with the model resolved.
#[derive(Serialize)]
struct Envelope<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a Request,
}

/// One call to the Messages endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Falls back to the client's model when unset.
    #[serde(skip)]
    pub model: Option<String>,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl Request {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
            messages,
            temperature: None,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    pub fn with_model(self, model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..self
        }
    }

    pub fn with_max_tokens(self, max_tokens: usize) -> Self {
        Self { max_tokens, ..self }
    }

    pub fn with_system(self, system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            ..self
        }
    }

    pub fn with_temperature(self, temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..self
        }
    }

    pub fn with_tools(self, tools: Vec<Tool>) -> Self {
        Self { tools, ..self }
    }

    pub fn with_tool_choice(self, tool_choice: ToolChoice) -> Self {
        Self {
            tool_choice: Some(tool_choice),
            ..self
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// Only user turns are sent; every request is a single prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// A piece of message content.
///
/// Block kinds the engine never reads (thinking, server tools) come back
/// as [`ContentBlock::Other`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other, skip_serializing)]
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// The model must call the named tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Tool { name: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub usage: Usage,
}

impl Response {
    /// All text blocks joined together.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Input of the first call to `tool_name`, if the model made one.
    pub fn tool_input(&self, tool_name: &str) -> Option<&Value> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input, .. } if name == tool_name => Some(input),
            _ => None,
        })
    }

    /// The reply was cut off at `max_tokens`.
    pub fn hit_token_limit(&self) -> bool {
        self.stop_reason == Some(StopReason::MaxTokens)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> Claude {
        Claude::new("test-key").unwrap()
    }

    fn wire(client: &Claude, request: &Request) -> Value {
        serde_json::to_value(Envelope {
            model: request.model.as_deref().unwrap_or(client.model()),
            request,
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_is_normalised() {
        let client = client().with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/messages");
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_plain_request_on_the_wire() {
        let request = Request::new(vec![Message::user("Describe the docks")])
            .with_system("You are a game master")
            .with_max_tokens(800);

        let body = wire(&client(), &request);
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["system"], "You are a game master");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_forced_tool_on_the_wire() {
        let tool = Tool {
            name: "classify_message".to_string(),
            description: "Classify a player message".to_string(),
            input_schema: json!({"type": "object", "properties": {}, "required": []}),
        };
        let request = Request::new(vec![Message::user("hi")])
            .with_model("claude-3-5-haiku-20241022")
            .with_tools(vec![tool])
            .with_tool_choice(ToolChoice::Tool {
                name: "classify_message".to_string(),
            });

        let body = wire(&client(), &request);
        assert_eq!(body["model"], "claude-3-5-haiku-20241022");
        assert_eq!(
            body["tool_choice"],
            json!({"type": "tool", "name": "classify_message"})
        );
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_reply_with_tool_call_and_thinking() {
        let response: Response = serde_json::from_value(json!({
            "id": "msg_1",
            "model": "claude",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "x"},
                {"type": "text", "text": "Sure."},
                {"type": "tool_use", "id": "tu_1", "name": "classify_message",
                 "input": {"classification": "GM_REQUEST_INFO"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();

        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert!(matches!(response.content[0], ContentBlock::Other));
        assert_eq!(response.text(), "Sure.");
        assert_eq!(
            response.tool_input("classify_message").unwrap()["classification"],
            "GM_REQUEST_INFO"
        );
        assert!(response.tool_input("judge_question").is_none());
        assert_eq!(response.usage.output_tokens, 5);
    }

    #[test]
    fn test_truncated_reply() {
        let response: Response = serde_json::from_value(json!({
            "id": "msg_2",
            "model": "claude",
            "content": [{"type": "text", "text": "The vault door"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 1, "output_tokens": 4096}
        }))
        .unwrap();
        assert!(response.hit_token_limit());
    }

    #[test]
    fn test_transport_classification() {
        assert!(Error::Network("reset".into()).is_transport());
        assert!(Error::Api { status: 529, message: String::new() }.is_transport());
        assert!(Error::Api { status: 429, message: String::new() }.is_transport());
        assert!(!Error::Api { status: 400, message: String::new() }.is_transport());
        assert!(!Error::Parse("bad".into()).is_transport());
    }
}
