//! # agent-core
//!
//! Tool-augmented conversational agent core: an orchestration loop, a tool
//! registry with contained execution, pluggable conversation storage and
//! history compression.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │ Conversation │  │   History    │  │      LlmClient         │  │
//! │  │  Repository  │──│  Compressor  │──│      (Strategy)        │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! │           │                                     │                │
//! │           │        ┌──────────────┐  ┌──────────┴─────────────┐  │
//! │           └────────│ ToolExecutor │──│     ToolRegistry       │  │
//! │                    └──────────────┘  └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmClient` and `ConversationRepository` traits let the same loop run
//! against Ollama or a scripted client, and against in-memory or SQLite
//! storage, without changing orchestration logic.

pub mod builtin;
pub mod compression;
pub mod error;
pub mod executor;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod repository;
pub mod settings;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use compression::{CompressionOutcome, HistoryCompressor};
pub use error::{AgentError, Result};
pub use executor::ToolExecutor;
pub use message::{Message, Role, ToolCallRequest};
pub use orchestrator::{ChatRequest, ChatResponse, Orchestrator, OrchestratorConfig, TurnOutcome};
pub use prompt::{DefaultPromptBuilder, PromptBuilder};
pub use provider::{LlmClient, ModelRequest, ModelResponse};
pub use repository::{ConversationRepository, InMemoryConversationRepository};
pub use settings::{CollectionMode, CollectionSettings, CompressionSettings, ResponseFormat};
pub use tool::{ParameterSchema, Tool, ToolDefinition, ToolRegistry};
