//! Application State

use std::sync::Arc;

use agent_core::Orchestrator;
use agent_runtime::OllamaClient;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Chat turn orchestrator (owns repository, model client and tools)
    pub orchestrator: Arc<Orchestrator>,

    /// Ollama client for health reporting (None when another client is wired in)
    pub ollama: Option<Arc<OllamaClient>>,
}
