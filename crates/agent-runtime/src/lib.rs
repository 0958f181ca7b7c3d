//! # agent-runtime
//!
//! Concrete model clients for the agent.
//!
//! ## Clients
//!
//! - **Ollama** (default): Local LLM inference via Ollama, with tool calls
//!   exchanged as ```` ```tool ```` JSON blocks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::ollama::OllamaClient;
//!
//! let client = Arc::new(OllamaClient::from_env());
//! let orchestrator = Orchestrator::new(repository, client, prompts, registry, config);
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaClient, OllamaConfig};
