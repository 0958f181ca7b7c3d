//! End-to-end chat turns against scripted model clients

use std::sync::Arc;
use std::time::Duration;

use agent_core::testing::{FailingTool, ScriptedLlmClient, StaticPromptBuilder};
use agent_core::{
    AgentError, ChatRequest, CollectionSettings, CompressionSettings, ConversationRepository,
    DefaultPromptBuilder, InMemoryConversationRepository, Message, ModelResponse, Orchestrator,
    OrchestratorConfig, ResponseFormat, Role, ToolCallRequest, ToolRegistry, TurnOutcome,
};

struct Harness {
    repository: Arc<InMemoryConversationRepository>,
    client: Arc<ScriptedLlmClient>,
    orchestrator: Orchestrator,
}

fn harness(client: ScriptedLlmClient, config: OrchestratorConfig) -> Harness {
    harness_with_tools(client, ToolRegistry::new(), config)
}

fn harness_with_tools(
    client: ScriptedLlmClient,
    registry: ToolRegistry,
    config: OrchestratorConfig,
) -> Harness {
    let repository = Arc::new(InMemoryConversationRepository::new());
    let client = Arc::new(client);
    let orchestrator = Orchestrator::new(
        repository.clone(),
        client.clone(),
        Arc::new(StaticPromptBuilder::new("S")),
        Arc::new(registry),
        config,
    );
    Harness {
        repository,
        client,
        orchestrator,
    }
}

fn echo_call(id: &str, text: &str) -> ToolCallRequest {
    ToolCallRequest::new(id, "echo", format!(r#"{{"text":"{text}"}}"#))
}

#[tokio::test]
async fn test_basic_turn() {
    let h = harness(
        ScriptedLlmClient::new(vec![ModelResponse::text("hello")]),
        OrchestratorConfig::default(),
    );
    h.repository.init_conversation("c1", Message::system("S")).unwrap();

    let response = h
        .orchestrator
        .chat(ChatRequest::new("hi").in_conversation("c1"))
        .await
        .unwrap();

    assert_eq!(response.conversation_id, "c1");
    assert_eq!(response.message.text(), "hello");
    assert_eq!(response.outcome, TurnOutcome::Completed);
    assert_eq!(response.iterations, 1);

    let history = h.orchestrator.get_history("c1").unwrap();
    let summary: Vec<_> = history.iter().map(|m| (m.role, m.text())).collect();
    assert_eq!(
        summary,
        vec![(Role::System, "S"), (Role::User, "hi"), (Role::Assistant, "hello")]
    );

    let requests = h.client.requests();
    assert_eq!(requests[0].system_prompt, "S");
    assert_eq!(requests[0].history.len(), 1);
    assert!(requests[0].tools.iter().any(|t| t.name == "echo"));
}

#[tokio::test]
async fn test_new_conversation_gets_generated_id() {
    let h = harness(
        ScriptedLlmClient::new(vec![ModelResponse::text("hello")]),
        OrchestratorConfig::default(),
    );
    let response = h.orchestrator.chat(ChatRequest::new("hi")).await.unwrap();

    assert!(!response.conversation_id.is_empty());
    let history = h.orchestrator.get_history(&response.conversation_id).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history[0].text(), "S");
}

#[tokio::test]
async fn test_single_tool_round_trip() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            ModelResponse::tool_calls(vec![echo_call("call-1", "x")]),
            ModelResponse::text("done"),
        ]),
        OrchestratorConfig::default(),
    );
    h.repository.init_conversation("c1", Message::system("S")).unwrap();

    let response = h
        .orchestrator
        .chat(ChatRequest::new("echo x").in_conversation("c1"))
        .await
        .unwrap();
    assert_eq!(response.message.text(), "done");
    assert_eq!(response.iterations, 2);

    let history = h.orchestrator.get_history("c1").unwrap();
    let tail = &history[history.len() - 3..];
    assert_eq!(tail[0].role, Role::Assistant);
    assert_eq!(tail[0].tool_calls()[0].name, "echo");
    assert_eq!(tail[0].tool_calls()[0].call_type.as_deref(), Some("function"));
    assert_eq!(tail[1].role, Role::Tool);
    assert_eq!(tail[1].tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(tail[1].text(), "x");
    assert_eq!(tail[2].text(), "done");

    // The second model call sees the resolved batch
    let second = &h.client.requests()[1];
    let roles: Vec<_> = second.history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
}

#[tokio::test]
async fn test_bounded_loop_returns_after_max_iterations() {
    let h = harness(
        ScriptedLlmClient::always(ModelResponse::tool_calls(vec![echo_call("again", "x")])),
        OrchestratorConfig {
            max_iterations: 3,
            ..OrchestratorConfig::default()
        },
    );

    let response = h
        .orchestrator
        .chat(ChatRequest::new("loop forever").in_conversation("c1"))
        .await
        .unwrap();

    assert_eq!(h.client.request_count(), 3);
    assert_eq!(response.iterations, 3);
    assert_eq!(response.outcome, TurnOutcome::IterationLimit);
    assert!(response.message.has_tool_calls());

    // Two resolved batches, then the unresolved final response
    let history = h.orchestrator.get_history("c1").unwrap();
    let tool_results = history.iter().filter(|m| m.role == Role::Tool).count();
    assert_eq!(tool_results, 2);
    assert_eq!(history.last(), Some(&response.message));
}

#[tokio::test]
async fn test_failing_tool_does_not_stop_batch() {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(FailingTool::named("broken")));
    let h = harness_with_tools(
        ScriptedLlmClient::new(vec![
            ModelResponse::tool_calls(vec![
                ToolCallRequest::new("a", "broken", "{}"),
                ToolCallRequest::new("b", "nope", "{}"),
                echo_call("c", "still here"),
            ]),
            ModelResponse::text("recovered"),
        ]),
        registry,
        OrchestratorConfig::default(),
    );

    let response = h
        .orchestrator
        .chat(ChatRequest::new("go").in_conversation("c1"))
        .await
        .unwrap();
    assert_eq!(response.message.text(), "recovered");

    let results: Vec<_> = h
        .orchestrator
        .get_history("c1")
        .unwrap()
        .into_iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].tool_call_id.as_deref(), Some("a"));
    assert!(results[0].text().starts_with("Tool execution error"));
    assert_eq!(results[1].text(), "Tool not found: nope");
    assert_eq!(results[2].text(), "still here");
}

#[tokio::test]
async fn test_provider_error_propagates() {
    let h = harness(
        ScriptedLlmClient::failing("connection refused"),
        OrchestratorConfig::default(),
    );

    let result = h.orchestrator.chat(ChatRequest::new("hi").in_conversation("c1")).await;
    assert!(matches!(result, Err(AgentError::Provider(_))));

    // Writes made before the failure stay
    let history = h.orchestrator.get_history("c1").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text(), "hi");
}

#[tokio::test(start_paused = true)]
async fn test_model_timeout_surfaces() {
    struct Stalled;

    #[async_trait::async_trait]
    impl agent_core::LlmClient for Stalled {
        async fn send(
            &self,
            _request: &agent_core::ModelRequest,
        ) -> agent_core::Result<ModelResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ModelResponse::text("too late"))
        }
    }

    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryConversationRepository::new()),
        Arc::new(Stalled),
        Arc::new(StaticPromptBuilder::new("S")),
        Arc::new(ToolRegistry::empty()),
        OrchestratorConfig {
            model_timeout: Some(Duration::from_secs(5)),
            ..OrchestratorConfig::default()
        },
    );

    let result = orchestrator.chat(ChatRequest::new("hi")).await;
    assert!(matches!(result, Err(AgentError::Timeout(_))));
}

#[tokio::test]
async fn test_conversations_are_isolated() {
    let h = harness(
        ScriptedLlmClient::new(vec![ModelResponse::text("for b"), ModelResponse::text("for a")]),
        OrchestratorConfig::default(),
    );
    h.orchestrator
        .chat(ChatRequest::new("b question").in_conversation("b"))
        .await
        .unwrap();
    let before = h.orchestrator.get_history("b").unwrap();

    h.orchestrator
        .chat(
            ChatRequest::new("a question")
                .in_conversation("a")
                .with_format(ResponseFormat::Markdown),
        )
        .await
        .unwrap();

    assert_eq!(h.orchestrator.get_history("b").unwrap(), before);
    assert_eq!(h.repository.get_format("b").unwrap(), None);
    assert_eq!(h.repository.get_format("a").unwrap(), Some(ResponseFormat::Markdown));
}

#[tokio::test]
async fn test_compression_runs_before_the_turn() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            ModelResponse::text("summary text"),
            ModelResponse::text("answer"),
        ]),
        OrchestratorConfig::default(),
    );

    let mut history = vec![Message::system("S")];
    for i in 0..11 {
        history.push(Message::user(format!("message {i}")));
    }
    h.repository.replace_history("c1", history.clone()).unwrap();

    let response = h
        .orchestrator
        .chat(
            ChatRequest::new("next")
                .in_conversation("c1")
                .with_compression(CompressionSettings::enabled(10, 4)),
        )
        .await
        .unwrap();

    let outcome = response.compression.unwrap();
    assert!(outcome.compressed);
    assert_eq!(outcome.original_count, 12);
    assert_eq!(outcome.compressed_count, 6);

    // system + summary + 4 kept + user + assistant
    let stored = h.orchestrator.get_history("c1").unwrap();
    assert_eq!(stored.len(), 8);
    assert_eq!(&stored[2..6], &history[8..]);
    assert_eq!(stored[7].text(), "answer");
    assert_eq!(
        h.repository.get_compression_settings("c1").unwrap(),
        Some(CompressionSettings::enabled(10, 4))
    );
}

#[tokio::test]
async fn test_compression_keeping_nothing_summarizes_whole_history() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            ModelResponse::text("summary text"),
            ModelResponse::text("answer"),
        ]),
        OrchestratorConfig::default(),
    );

    let mut history = vec![Message::system("S")];
    for i in 0..11 {
        history.push(Message::user(format!("message {i}")));
    }
    h.repository.replace_history("c1", history).unwrap();

    let response = h
        .orchestrator
        .chat(
            ChatRequest::new("next")
                .in_conversation("c1")
                .with_compression(CompressionSettings::enabled(10, 0)),
        )
        .await
        .unwrap();

    let outcome = response.compression.unwrap();
    assert!(outcome.compressed);
    assert_eq!(outcome.compressed_count, 2);

    // system + summary + user + assistant
    let stored = h.orchestrator.get_history("c1").unwrap();
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[0].role, Role::System);
    assert!(stored[1].text().contains("summary text"));
    assert_eq!(stored[2].text(), "next");
    assert_eq!(stored[3].text(), "answer");
}

#[tokio::test]
async fn test_failed_compression_does_not_fail_turn() {
    let h = harness(
        ScriptedLlmClient::new(vec![ModelResponse::text("  "), ModelResponse::text("answer")]),
        OrchestratorConfig {
            default_compression: Some(CompressionSettings::enabled(3, 1)),
            ..OrchestratorConfig::default()
        },
    );
    let history: Vec<_> = std::iter::once(Message::system("S"))
        .chain((0..4).map(|i| Message::user(i.to_string())))
        .collect();
    h.repository.replace_history("c1", history).unwrap();

    let response = h
        .orchestrator
        .chat(ChatRequest::new("hi").in_conversation("c1"))
        .await
        .unwrap();
    assert!(response.compression.is_none());
    assert_eq!(h.orchestrator.get_history("c1").unwrap().len(), 7);
}

#[tokio::test]
async fn test_collection_settings_rerender_system_prompt() {
    let repository = Arc::new(InMemoryConversationRepository::new());
    let client = Arc::new(ScriptedLlmClient::always(ModelResponse::text("ok")));
    let orchestrator = Orchestrator::new(
        repository.clone(),
        client.clone(),
        Arc::new(DefaultPromptBuilder::new("base")),
        Arc::new(ToolRegistry::empty()),
        OrchestratorConfig::default(),
    );

    orchestrator
        .chat(ChatRequest::new("one").in_conversation("c1"))
        .await
        .unwrap();
    assert_eq!(repository.get_history("c1").unwrap()[0].text(), "base");

    orchestrator
        .chat(
            ChatRequest::new("two")
                .in_conversation("c1")
                .with_collections(CollectionSettings::single("docs")),
        )
        .await
        .unwrap();

    let system = repository.get_history("c1").unwrap()[0].text().to_string();
    assert!(system.contains("- docs"));
    assert_eq!(client.requests()[1].system_prompt, system);
}

#[tokio::test]
async fn test_reset_history_keeps_system_message() {
    let h = harness(
        ScriptedLlmClient::new(vec![ModelResponse::text("hello")]),
        OrchestratorConfig::default(),
    );
    h.orchestrator
        .chat(ChatRequest::new("hi").in_conversation("c1"))
        .await
        .unwrap();

    assert!(h.orchestrator.reset_history("c1").await.unwrap());
    let history = h.orchestrator.get_history("c1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::System);

    assert!(!h.orchestrator.reset_history("missing").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_turns_on_one_conversation_do_not_interleave() {
    let h = Arc::new(harness(
        ScriptedLlmClient::always(ModelResponse::text("ok")),
        OrchestratorConfig::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            h.orchestrator
                .chat(ChatRequest::new(format!("q{i}")).in_conversation("shared"))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let history = h.orchestrator.get_history("shared").unwrap();
    assert_eq!(history.len(), 1 + 8 * 2);
    for pair in history[1..].chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
}
