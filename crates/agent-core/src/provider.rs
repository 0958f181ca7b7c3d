//! LLM Client Strategy Pattern
//!
//! Defines a common interface for all language-model backends (Ollama,
//! OpenAI, Anthropic, etc.) so the orchestrator can work with any of them
//! without code changes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{LlmClient, ModelRequest};
//!
//! let client = OllamaClient::from_env();
//! let response = client.send(&request).await?;
//! if response.is_final() { /* answer */ }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, ToolCallRequest};
use crate::settings::ResponseFormat;
use crate::tool::ToolDefinition;

/// Everything a backend needs for one model call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Rendered system prompt
    pub system_prompt: String,

    /// Conversation history, without the leading system message
    pub history: Vec<Message>,

    /// Tools the model may call
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    /// Requested answer format, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl ModelRequest {
    pub fn new(system_prompt: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history,
            tools: Vec::new(),
            response_format: None,
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_response_format(mut self, format: Option<ResponseFormat>) -> Self {
        self.response_format = format;
        self
    }
}

/// Outcome of one model call: a final answer or a batch of tool calls
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text (may accompany tool calls)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool calls requested by the model
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelResponse {
    /// A final answer
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A tool call batch without accompanying text
    pub const fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls: calls,
        }
    }

    /// True when the model requested no tools
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// Strategy trait for language-model backends
///
/// Implement this trait to add support for new LLM backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the system prompt, history and tool manifest to the model
    async fn send(&self, request: &ModelRequest) -> Result<ModelResponse>;
}
