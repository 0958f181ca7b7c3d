//! Agent Orchestrator
//!
//! Sequences one chat turn: load or create the conversation, compress it if
//! due, call the model, resolve any tool calls it requests and loop until it
//! answers or the iteration bound is reached.
//!
//! ```text
//! Received → PromptReady → ModelCalled ─┬─→ Done
//!                              ▲        │
//!                              │        ▼
//!                     ToolsResolved ← ToolsPending
//! ```
//!
//! Any state may end in `Failed` when the model client or the repository
//! returns an error. Tool failures never get that far: they come back as
//! tool-result text.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::compression::{CompressionOutcome, HistoryCompressor};
use crate::error::{AgentError, Result};
use crate::executor::ToolExecutor;
use crate::message::{Message, Role};
use crate::prompt::PromptBuilder;
use crate::provider::{LlmClient, ModelRequest, ModelResponse};
use crate::repository::ConversationRepository;
use crate::settings::{CollectionSettings, CompressionSettings, ResponseFormat};
use crate::tool::{ToolDefinition, ToolRegistry};

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Model calls allowed per turn
    pub max_iterations: usize,

    /// Upper bound on a single model call
    pub model_timeout: Option<Duration>,

    /// Compression policy for conversations that never set one
    pub default_compression: Option<CompressionSettings>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            model_timeout: Some(Duration::from_secs(120)),
            default_compression: None,
        }
    }
}

/// Input for one chat turn
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Existing conversation, or `None` to start a new one
    #[serde(default)]
    pub conversation_id: Option<String>,

    /// The user's message
    pub message: String,

    #[serde(default)]
    pub response_format: Option<ResponseFormat>,

    #[serde(default)]
    pub collection_settings: Option<CollectionSettings>,

    #[serde(default)]
    pub compression_settings: Option<CompressionSettings>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    #[must_use]
    pub fn with_collections(mut self, settings: CollectionSettings) -> Self {
        self.collection_settings = Some(settings);
        self
    }

    #[must_use]
    pub const fn with_compression(mut self, settings: CompressionSettings) -> Self {
        self.compression_settings = Some(settings);
        self
    }
}

/// How a turn ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The model produced a final answer
    Completed,
    /// The iteration bound was reached; the message may still carry tool calls
    IterationLimit,
}

/// Result of one chat turn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Final assistant message, as persisted
    pub message: Message,
    pub conversation_id: String,
    /// Present when compression was evaluated for this turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionOutcome>,
    /// Model calls made during the turn
    pub iterations: usize,
    pub outcome: TurnOutcome,
}

/// Turn state machine positions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Received,
    PromptReady,
    ModelCalled,
    ToolsPending,
    ToolsResolved,
    Done,
    Failed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::PromptReady => "prompt_ready",
            Self::ModelCalled => "model_called",
            Self::ToolsPending => "tools_pending",
            Self::ToolsResolved => "tools_resolved",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks one turn's position for logging
struct Turn<'a> {
    conversation_id: &'a str,
    state: TurnState,
    iteration: usize,
}

impl<'a> Turn<'a> {
    const fn new(conversation_id: &'a str) -> Self {
        Self {
            conversation_id,
            state: TurnState::Received,
            iteration: 0,
        }
    }

    fn advance(&mut self, next: TurnState) {
        debug!(
            conversation_id = %self.conversation_id,
            iteration = self.iteration,
            from = %self.state,
            to = %next,
            "Turn state transition"
        );
        self.state = next;
    }
}

/// One async mutex per conversation id with a turn in flight.
///
/// Entries nobody holds are pruned on the next acquisition.
#[derive(Default)]
pub struct TurnLocks {
    locks: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock serializing turns for `conversation_id`
    pub fn lock_for(&self, conversation_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(conversation_id.to_string()).or_default())
    }

    /// Number of conversations currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives chat turns over a repository, a model client and a tool registry
pub struct Orchestrator {
    repository: Arc<dyn ConversationRepository>,
    client: Arc<dyn LlmClient>,
    prompt_builder: Arc<dyn PromptBuilder>,
    executor: ToolExecutor,
    compressor: HistoryCompressor,
    config: OrchestratorConfig,
    turn_locks: TurnLocks,
}

impl Orchestrator {
    pub fn new(
        repository: Arc<dyn ConversationRepository>,
        client: Arc<dyn LlmClient>,
        prompt_builder: Arc<dyn PromptBuilder>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            repository,
            compressor: HistoryCompressor::new(Arc::clone(&client)),
            client,
            prompt_builder,
            executor: ToolExecutor::new(registry),
            config,
            turn_locks: TurnLocks::new(),
        }
    }

    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one chat turn.
    ///
    /// Turns on the same conversation are serialized; turns on different
    /// conversations run independently.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        if self.config.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }

        let conversation_id = request
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let lock = self.turn_locks.lock_for(&conversation_id);
        let _guard = lock.lock().await;

        let mut turn = Turn::new(&conversation_id);
        match self.run_turn(&mut turn, request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                let failed_in = turn.state;
                turn.advance(TurnState::Failed);
                warn!(
                    conversation_id = %conversation_id,
                    state = %failed_in,
                    error = %e,
                    "Chat turn failed"
                );
                Err(e)
            }
        }
    }

    async fn run_turn(&self, turn: &mut Turn<'_>, request: ChatRequest) -> Result<ChatResponse> {
        let id = turn.conversation_id;
        let repo = &*self.repository;

        // Request settings become the conversation's settings
        if let Some(format) = request.response_format {
            repo.set_format(id, format)?;
        }
        let collection_changed = request.collection_settings.is_some();
        if let Some(collection) = request.collection_settings {
            repo.set_collection_settings(id, collection)?;
        }
        if let Some(compression) = request.compression_settings {
            repo.set_compression_settings(id, compression)?;
        }

        let rendered = self
            .prompt_builder
            .build(repo.get_collection_settings(id)?.as_ref());
        if !repo.has_conversation(id)? {
            repo.init_conversation(id, Message::system(rendered.clone()))?;
            info!(conversation_id = %id, "Started conversation");
        } else if collection_changed {
            repo.update_system_prompt(id, &rendered)?;
        }

        let compression = self.maybe_compress(id).await;

        turn.advance(TurnState::PromptReady);
        repo.add_message(id, Message::user(request.message))?;
        let format = repo.get_format(id)?;
        let tools = self.tool_manifest();

        loop {
            turn.iteration += 1;
            let history = repo.get_history(id)?;
            let (system_prompt, history) = split_system_prompt(history, &rendered);
            let model_request = ModelRequest::new(system_prompt, history)
                .with_tools(tools.clone())
                .with_response_format(format.clone());

            turn.advance(TurnState::ModelCalled);
            let ModelResponse { content, mut tool_calls } = self.call_model(&model_request).await?;

            if tool_calls.is_empty() {
                let message = Message::assistant(content.unwrap_or_default());
                repo.add_message(id, message.clone())?;
                turn.advance(TurnState::Done);
                return Ok(ChatResponse {
                    message,
                    conversation_id: id.to_string(),
                    compression,
                    iterations: turn.iteration,
                    outcome: TurnOutcome::Completed,
                });
            }

            ToolExecutor::normalize(&mut tool_calls);
            let assistant = Message::assistant_with_tool_calls(content, tool_calls);

            if turn.iteration >= self.config.max_iterations {
                warn!(
                    conversation_id = %id,
                    max_iterations = self.config.max_iterations,
                    pending_calls = assistant.tool_calls().len(),
                    "Iteration limit reached with tool calls outstanding"
                );
                repo.add_message(id, assistant.clone())?;
                turn.advance(TurnState::Done);
                return Ok(ChatResponse {
                    message: assistant,
                    conversation_id: id.to_string(),
                    compression,
                    iterations: turn.iteration,
                    outcome: TurnOutcome::IterationLimit,
                });
            }

            turn.advance(TurnState::ToolsPending);
            let results = self.executor.execute_batch(assistant.tool_calls()).await;

            let mut batch = Vec::with_capacity(results.len() + 1);
            batch.push(assistant);
            batch.extend(results);
            repo.add_messages(id, batch)?;
            turn.advance(TurnState::ToolsResolved);
        }
    }

    /// Compress if the conversation's policy calls for it.
    ///
    /// A failed summary leaves the history untouched and the turn continues.
    async fn maybe_compress(&self, id: &str) -> Option<CompressionOutcome> {
        let settings = match self.repository.get_compression_settings(id) {
            Ok(stored) => stored.or(self.config.default_compression)?,
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "Could not read compression settings");
                return None;
            }
        };
        if !settings.enabled {
            return None;
        }

        match self.compressor.compress(&*self.repository, id, &settings).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    conversation_id = %id,
                    error = %e,
                    "Compression failed, continuing uncompressed"
                );
                None
            }
        }
    }

    async fn call_model(&self, request: &ModelRequest) -> Result<ModelResponse> {
        match self.config.model_timeout {
            Some(limit) => tokio::time::timeout(limit, self.client.send(request))
                .await
                .map_err(|_| AgentError::Timeout(limit))?,
            None => self.client.send(request).await,
        }
    }

    /// Snapshot of a conversation's history
    pub fn get_history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.repository.get_history(conversation_id)
    }

    /// Drop everything but the system message.
    ///
    /// Returns `false` when the conversation does not exist.
    pub async fn reset_history(&self, conversation_id: &str) -> Result<bool> {
        let lock = self.turn_locks.lock_for(conversation_id);
        let _guard = lock.lock().await;

        if !self.repository.has_conversation(conversation_id)? {
            return Ok(false);
        }

        let kept: Vec<_> = self
            .repository
            .get_history(conversation_id)?
            .into_iter()
            .take(1)
            .filter(|m| m.role == Role::System)
            .collect();
        self.repository.replace_history(conversation_id, kept)?;
        info!(conversation_id = %conversation_id, "Reset conversation history");
        Ok(true)
    }

    /// Tools advertised to the model
    pub fn tool_manifest(&self) -> Vec<ToolDefinition> {
        self.executor.registry().all_tools()
    }
}

/// Separate the stored system message from the rest of the history.
///
/// Falls back to `rendered` when the history does not start with one.
fn split_system_prompt(mut history: Vec<Message>, rendered: &str) -> (String, Vec<Message>) {
    if history.first().is_some_and(|m| m.role == Role::System) {
        let system = history.remove(0);
        (system.text().to_string(), history)
    } else {
        (rendered.to_string(), history)
    }
}
