//! HTTP Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use serde_json::Value;

use agent_core::{AgentError, ChatRequest, ChatResponse, Message};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub ollama_connected: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub conversation_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<ToolInfo>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

/// Map an agent failure onto an HTTP status without leaking internals
fn agent_error(e: &AgentError) -> ApiError {
    let (status, code) = match e {
        AgentError::Provider(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
        AgentError::ProviderUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_UNAVAILABLE")
        }
        AgentError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
        AgentError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR"),
    };
    api_error(status, code, e.user_message())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ollama_connected = match &state.ollama {
        Some(client) => client.health_check().await,
        None => false,
    };

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        ollama_connected,
    })
}

/// Run one chat turn
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "EMPTY_MESSAGE",
            "Message must not be empty",
        ));
    }

    let response = state.orchestrator.chat(payload).await.map_err(|e| {
        tracing::error!(error = %e, "Chat turn failed");
        agent_error(&e)
    })?;

    Ok(Json(response))
}

/// Conversation history snapshot
pub async fn get_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let messages = state.orchestrator.get_history(&conversation_id).map_err(|e| {
        tracing::error!(conversation_id = %conversation_id, error = %e, "History lookup failed");
        agent_error(&e)
    })?;

    Ok(Json(HistoryResponse {
        conversation_id,
        messages,
    }))
}

/// Drop a conversation's history, keeping its system message
pub async fn reset_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let existed = state
        .orchestrator
        .reset_history(&conversation_id)
        .await
        .map_err(|e| {
            tracing::error!(conversation_id = %conversation_id, error = %e, "History reset failed");
            agent_error(&e)
        })?;

    if existed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Conversation '{conversation_id}' does not exist"),
        ))
    }
}

/// Tool manifest advertised to the model
pub async fn list_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    let tools = state
        .orchestrator
        .tool_manifest()
        .into_iter()
        .map(|definition| ToolInfo {
            parameters: definition.to_json_schema(),
            name: definition.name,
            description: definition.description,
        })
        .collect();

    Json(ToolsResponse { tools })
}
