//! Ollama LLM Client
//!
//! Implementation of `LlmClient` for local Ollama inference. Tool calling
//! uses a text protocol: the tool manifest is rendered into the system
//! prompt and the model answers with ```` ```tool ```` JSON blocks.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role, ToolCallRequest},
    provider::{LlmClient, ModelRequest, ModelResponse},
    tool::render_tool_section,
};
use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, MessageRole, request::ChatMessageRequest},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const TOOL_FENCE: &str = "```tool";
const FENCE_END: &str = "```";

/// Ollama client configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Model used for every request
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            model: "llama3.2".into(),
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = std::env::var("OLLAMA_HOST").unwrap_or(defaults.host);
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let model = std::env::var("OLLAMA_MODEL").unwrap_or(defaults.model);

        Self { host, port, model }
    }
}

/// Tool call as written by the model inside a ```` ```tool ```` block
#[derive(Debug, Serialize, Deserialize)]
struct TextToolCall {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

impl TextToolCall {
    fn into_request(self) -> ToolCallRequest {
        let arguments = match self.arguments {
            Value::Null => "{}".to_string(),
            // Some models double-encode the arguments object
            Value::String(raw) => raw,
            other => other.to_string(),
        };
        ToolCallRequest::new(
            format!("call_{}", uuid::Uuid::new_v4().simple()),
            self.tool,
            arguments,
        )
    }
}

/// Ollama LLM client
pub struct OllamaClient {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaClient {
    /// Create a client for a custom host/port with the default model
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(config.host.clone(), config.port),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Whether the Ollama server answers
    pub async fn health_check(&self) -> bool {
        match self.client.list_local_models().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Ollama health check failed");
                false
            }
        }
    }

    /// Names of the locally available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        Ok(models.into_iter().map(|m| m.name).collect())
    }

    /// System prompt plus the tool manifest and format instruction
    fn system_prompt(request: &ModelRequest) -> String {
        let mut prompt = request.system_prompt.clone();

        if !request.tools.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(render_tool_section(&request.tools).trim_end());
        }
        if let Some(format) = &request.response_format {
            prompt.push_str("\n\n");
            prompt.push_str(&format.instruction());
        }

        prompt
    }

    /// Convert agent messages to Ollama format
    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::System => ChatMessage::new(MessageRole::System, m.text().to_string()),
                Role::User => ChatMessage::new(MessageRole::User, m.text().to_string()),
                Role::Assistant => ChatMessage::new(MessageRole::Assistant, render_assistant(m)),
                // Tool results appear as user context
                Role::Tool => ChatMessage::new(
                    MessageRole::User,
                    format!(
                        "[Tool result for {}]\n{}",
                        m.tool_call_id.as_deref().unwrap_or("unknown call"),
                        m.text()
                    ),
                ),
            })
            .collect()
    }
}

/// Assistant text with its tool calls written back as ```` ```tool ```` blocks
fn render_assistant(message: &Message) -> String {
    let mut parts = Vec::new();
    if !message.text().is_empty() {
        parts.push(message.text().to_string());
    }
    for call in message.tool_calls() {
        let arguments = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| Value::String(call.arguments.clone()));
        let block = TextToolCall {
            tool: call.name.clone(),
            arguments,
        };
        let json = serde_json::to_string(&block).unwrap_or_default();
        parts.push(format!("{TOOL_FENCE}\n{json}\n{FENCE_END}"));
    }
    parts.join("\n\n")
}

/// Split a model reply into prose and tool calls.
///
/// Every well-formed ```` ```tool ```` block becomes a call; malformed blocks
/// stay in the text. With no blocks at all, a bare JSON object carrying a
/// `"tool"` key is accepted as a single call.
pub fn parse_response(content: &str) -> ModelResponse {
    let mut calls = Vec::new();
    let mut prose = String::new();
    let mut rest = content;

    while let Some(start) = rest.find(TOOL_FENCE) {
        let after = &rest[start + TOOL_FENCE.len()..];
        let Some(end) = after.find(FENCE_END) else {
            break;
        };

        let block_end = start + TOOL_FENCE.len() + end + FENCE_END.len();
        match serde_json::from_str::<TextToolCall>(after[..end].trim()) {
            Ok(call) => {
                prose.push_str(&rest[..start]);
                calls.push(call.into_request());
            }
            Err(e) => {
                debug!(error = %e, "Ignoring malformed tool block");
                prose.push_str(&rest[..block_end]);
            }
        }
        rest = &rest[block_end..];
    }
    prose.push_str(rest);

    if calls.is_empty() {
        return parse_inline_tool_call(content).map_or_else(
            || ModelResponse::text(content.trim()),
            |call| ModelResponse::tool_calls(vec![call]),
        );
    }

    let prose = prose.trim();
    ModelResponse {
        content: (!prose.is_empty()).then(|| prose.to_string()),
        tool_calls: calls,
    }
}

/// Try to parse inline JSON tool call
fn parse_inline_tool_call(content: &str) -> Option<ToolCallRequest> {
    if !content.contains(r#""tool""#) {
        return None;
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str::<TextToolCall>(&content[start..=end])
        .ok()
        .map(TextToolCall::into_request)
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn send(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let mut messages = vec![ChatMessage::new(
            MessageRole::System,
            Self::system_prompt(request),
        )];
        messages.extend(Self::convert_messages(&request.history));

        let chat = ChatMessageRequest::new(self.config.model.clone(), messages);
        let response = self
            .client
            .send_chat_messages(chat)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let parsed = parse_response(&response.message.content);
        debug!(
            model = %self.config.model,
            tool_calls = parsed.tool_calls.len(),
            "Received Ollama response"
        );
        Ok(parsed)
    }
}
