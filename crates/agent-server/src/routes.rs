//! Router assembly

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{chat_handler, get_history, health_check, list_tools, reset_history};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        // Agent API
        .route("/api/chat", post(chat_handler))
        .route(
            "/api/conversations/{id}/history",
            get(get_history).delete(reset_history),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_core::testing::{ScriptedLlmClient, StaticPromptBuilder};
    use agent_core::{
        InMemoryConversationRepository, ModelResponse, Orchestrator, OrchestratorConfig,
        ToolCallRequest, ToolRegistry,
    };
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    fn app(responses: Vec<ModelResponse>) -> Router {
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryConversationRepository::new()),
            Arc::new(ScriptedLlmClient::new(responses)),
            Arc::new(StaticPromptBuilder::new("S")),
            Arc::new(ToolRegistry::new()),
            OrchestratorConfig::default(),
        );
        build_router(AppState {
            orchestrator: Arc::new(orchestrator),
            ollama: None,
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_chat(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(Vec::new());
        let (status, body) = send(&app, request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["ollama_connected"], false);
    }

    #[tokio::test]
    async fn test_chat_then_history() {
        let app = app(vec![
            ModelResponse::tool_calls(vec![ToolCallRequest::new("c1", "echo", r#"{"text":"x"}"#)]),
            ModelResponse::text("done"),
        ]);

        let (status, body) = send(
            &app,
            post_chat(&json!({"conversation_id": "abc", "message": "echo x"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversation_id"], "abc");
        assert_eq!(body["message"]["content"], "done");
        assert_eq!(body["outcome"], "completed");
        assert_eq!(body["iterations"], 2);

        let (status, body) = send(&app, request("GET", "/api/conversations/abc/history")).await;
        assert_eq!(status, StatusCode::OK);
        let roles: Vec<_> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool", "assistant"]);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let app = app(Vec::new());
        let (status, body) = send(&app, post_chat(&json!({"message": "   "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "EMPTY_MESSAGE");
    }

    #[tokio::test]
    async fn test_provider_failure_maps_to_bad_gateway() {
        let app = app(Vec::new());
        let (status, body) = send(&app, post_chat(&json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "PROVIDER_ERROR");
    }

    #[tokio::test]
    async fn test_chat_accepts_compression_keeping_nothing() {
        let app = app(vec![
            ModelResponse::text("hello"),
            ModelResponse::text("summary"),
            ModelResponse::text("answer"),
        ]);
        send(&app, post_chat(&json!({"conversation_id": "abc", "message": "hi"}))).await;

        let (status, body) = send(
            &app,
            post_chat(&json!({
                "conversation_id": "abc",
                "message": "again",
                "compression_settings": {
                    "enabled": true,
                    "message_threshold": 2,
                    "keep_recent_messages": 0
                }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["compression"]["compressed_count"], 2);
        assert_eq!(body["message"]["content"], "answer");

        let (_, body) = send(&app, request("GET", "/api/conversations/abc/history")).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_reset_history() {
        let app = app(vec![ModelResponse::text("hello")]);
        send(&app, post_chat(&json!({"conversation_id": "abc", "message": "hi"}))).await;

        let (status, _) = send(&app, request("DELETE", "/api/conversations/abc/history")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, request("GET", "/api/conversations/abc/history")).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);

        let (status, body) = send(&app, request("DELETE", "/api/conversations/nope/history")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_tools() {
        let app = app(Vec::new());
        let (status, body) = send(&app, request("GET", "/api/tools")).await;
        assert_eq!(status, StatusCode::OK);

        let tools = body["tools"].as_array().unwrap();
        let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["calculate", "datetime", "echo"]);
        assert_eq!(tools[2]["parameters"]["required"], json!(["text"]));
    }
}
