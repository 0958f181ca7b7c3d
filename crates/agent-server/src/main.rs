//! tool-agent HTTP Server
//!
//! Axum-based server exposing the agent orchestrator over a small REST API.
//! This is the composition root: configuration, storage, model client and
//! tool registry are all built here and handed to the orchestrator.

mod config;
mod handlers;
mod routes;
mod state;

use std::sync::Arc;

use agent_core::{
    ConversationRepository, DefaultPromptBuilder, InMemoryConversationRepository, Orchestrator,
    PromptBuilder, ToolRegistry,
};
use agent_runtime::OllamaClient;
use agent_store::SqliteConversationRepository;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, StorageBackend};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    config.validate()?;

    // Conversation storage
    let repository: Arc<dyn ConversationRepository> = match config.storage {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory conversation storage");
            Arc::new(InMemoryConversationRepository::new())
        }
        StorageBackend::Sqlite => {
            Arc::new(SqliteConversationRepository::open(&config.database_path)?)
        }
    };

    // Initialize LLM client
    let client = Arc::new(OllamaClient::from_env());
    if client.health_check().await {
        tracing::info!(model = %client.config().model, "Connected to Ollama");
        if let Ok(models) = client.list_models().await {
            for model in models {
                tracing::info!("  Model: {}", model);
            }
        }
    } else {
        tracing::warn!("Ollama not available - chat requests will fail until it is running");
    }

    // Initialize tools
    let registry = Arc::new(ToolRegistry::new().with_timeout(config.tool_timeout));
    tracing::info!("Registered {} tools:", registry.len());
    for name in registry.tool_names() {
        tracing::info!("  • {}", name);
    }

    let prompts: Arc<dyn PromptBuilder> = Arc::new(
        config
            .system_prompt
            .as_deref()
            .map_or_else(DefaultPromptBuilder::default, |base| DefaultPromptBuilder::new(base)),
    );

    let orchestrator = Orchestrator::new(
        repository,
        client.clone(),
        prompts,
        registry,
        config.orchestrator_config(),
    );

    let app = build_router(AppState {
        orchestrator: Arc::new(orchestrator),
        ollama: Some(client),
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("tool-agent server running on http://{}", config.bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health                           - Health check");
    tracing::info!("  GET    /api/tools                        - Tool manifest");
    tracing::info!("  POST   /api/chat                         - Run a chat turn");
    tracing::info!("  GET    /api/conversations/{{id}}/history - Conversation history");
    tracing::info!("  DELETE /api/conversations/{{id}}/history - Reset conversation");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}
