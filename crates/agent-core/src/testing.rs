//! Test doubles and the shared repository contract suite.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream crates.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AgentError, Result};
use crate::prompt::PromptBuilder;
use crate::provider::{LlmClient, ModelRequest, ModelResponse};
use crate::settings::CollectionSettings;
use crate::tool::{Tool, ToolDefinition};

pub use crate::builtin::EchoTool;

enum Script {
    /// Pop responses in order, then fail
    Queue(VecDeque<Result<ModelResponse>>),
    /// Return the same response forever
    Always(ModelResponse),
}

/// LLM client that replays scripted responses and records every request
pub struct ScriptedLlmClient {
    script: Mutex<Script>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedLlmClient {
    /// Responses are returned in order. Once exhausted, calls fail.
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    /// Script that may interleave provider failures
    pub fn from_results(responses: Vec<Result<ModelResponse>>) -> Self {
        Self {
            script: Mutex::new(Script::Queue(responses.into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Return `response` for every call
    pub fn always(response: ModelResponse) -> Self {
        Self {
            script: Mutex::new(Script::Always(response)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with a provider error
    pub fn failing(message: &str) -> Self {
        Self::from_results(vec![Err(AgentError::Provider(message.into()))])
    }

    /// All requests made so far
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn send(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.requests.lock().push(request.clone());

        match &mut *self.script.lock() {
            Script::Always(response) => Ok(response.clone()),
            Script::Queue(queue) => queue.pop_front().unwrap_or_else(|| {
                Err(AgentError::Provider(
                    "ScriptedLlmClient: no more responses available".into(),
                ))
            }),
        }
    }
}

/// Prompt builder returning a fixed string
pub struct StaticPromptBuilder(pub String);

impl StaticPromptBuilder {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self(prompt.into())
    }
}

impl PromptBuilder for StaticPromptBuilder {
    fn build(&self, _collection: Option<&CollectionSettings>) -> String {
        self.0.clone()
    }
}

/// Tool whose body always returns an error
pub struct FailingTool {
    name: String,
}

impl FailingTool {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name.clone(), "Always fails")
    }

    async fn execute(&self, _arguments: &str) -> Result<String> {
        Err(AgentError::ToolExecution("boom".into()))
    }
}

/// Tool whose body panics
pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("panics", "Always panics")
    }

    async fn execute(&self, _arguments: &str) -> Result<String> {
        panic!("tool body exploded")
    }
}

/// Tool that sleeps before answering
pub struct SlowTool {
    delay: Duration,
}

impl SlowTool {
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("slow", "Sleeps before answering")
    }

    async fn execute(&self, _arguments: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok("finally".into())
    }
}

/// Expand the conversation repository contract into `#[test]` functions.
///
/// `$factory` is evaluated once per test and must produce a fresh
/// repository implementing `ConversationRepository + Sync`.
#[macro_export]
macro_rules! conversation_repository_contract {
    ($factory:expr) => {
        mod repository_contract {
            #[allow(unused_imports)]
            use super::*;
            use $crate::message::{Message, Role};
            use $crate::repository::ConversationRepository;
            use $crate::settings::{CollectionSettings, CompressionSettings, ResponseFormat};

            #[test]
            fn init_is_idempotent() {
                let repo = $factory;
                repo.init_conversation("c1", Message::system("first")).unwrap();
                repo.init_conversation("c1", Message::system("second")).unwrap();

                let history = repo.get_history("c1").unwrap();
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].text(), "first");
            }

            #[test]
            fn unknown_conversation_is_empty() {
                let repo = $factory;
                assert!(!repo.has_conversation("nope").unwrap());
                assert!(repo.get_history("nope").unwrap().is_empty());
            }

            #[test]
            fn append_preserves_length_and_order() {
                let repo = $factory;
                repo.init_conversation("c1", Message::system("S")).unwrap();
                for i in 0..5 {
                    let before = repo.get_history("c1").unwrap().len();
                    let message = Message::user(format!("m{i}"));
                    repo.add_message("c1", message.clone()).unwrap();

                    let history = repo.get_history("c1").unwrap();
                    assert_eq!(history.len(), before + 1);
                    assert_eq!(history.last(), Some(&message));
                }
            }

            #[test]
            fn append_creates_conversation() {
                let repo = $factory;
                repo.add_messages("c1", vec![Message::user("a"), Message::assistant("b")])
                    .unwrap();
                assert!(repo.has_conversation("c1").unwrap());
                let history = repo.get_history("c1").unwrap();
                assert_eq!(history.len(), 2);
                assert_eq!(history[0].role, Role::User);
                assert_eq!(history[1].text(), "b");
            }

            #[test]
            fn history_is_a_snapshot() {
                let repo = $factory;
                repo.init_conversation("c1", Message::system("S")).unwrap();
                let mut snapshot = repo.get_history("c1").unwrap();
                snapshot.push(Message::user("not stored"));
                snapshot[0].content = Some("tampered".into());

                let history = repo.get_history("c1").unwrap();
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].text(), "S");
            }

            #[test]
            fn tool_call_metadata_survives_storage() {
                let repo = $factory;
                let call =
                    $crate::message::ToolCallRequest::new("call-1", "echo", r#"{"text":"x"}"#);
                let messages = vec![
                    Message::assistant_with_tool_calls(None, vec![call]),
                    Message::tool_result("call-1", "x"),
                ];
                repo.add_messages("c1", messages.clone()).unwrap();
                assert_eq!(repo.get_history("c1").unwrap(), messages);
            }

            #[test]
            fn update_system_prompt_only_touches_system_first_message() {
                let repo = $factory;
                repo.init_conversation("c1", Message::system("old")).unwrap();
                repo.add_message("c1", Message::user("hi")).unwrap();
                repo.update_system_prompt("c1", "new").unwrap();
                let history = repo.get_history("c1").unwrap();
                assert_eq!(history[0].text(), "new");
                assert_eq!(history[1].text(), "hi");

                repo.add_message("c2", Message::user("no system")).unwrap();
                repo.update_system_prompt("c2", "ignored").unwrap();
                assert_eq!(repo.get_history("c2").unwrap()[0].text(), "no system");

                repo.update_system_prompt("unknown", "ignored").unwrap();
                assert!(!repo.has_conversation("unknown").unwrap());
            }

            #[test]
            fn replace_history_is_exact() {
                let repo = $factory;
                repo.init_conversation("c1", Message::system("S")).unwrap();
                repo.add_message("c1", Message::user("old")).unwrap();

                let replacement = vec![
                    Message::system("S2"),
                    Message::assistant("summary"),
                    Message::user("recent"),
                ];
                repo.replace_history("c1", replacement.clone()).unwrap();
                assert_eq!(repo.get_history("c1").unwrap(), replacement);

                repo.replace_history("fresh", vec![Message::user("x")]).unwrap();
                assert!(repo.has_conversation("fresh").unwrap());
            }

            #[test]
            fn replace_history_is_atomic_for_readers() {
                let repo = $factory;
                let short: Vec<_> = (0..3).map(|i| Message::user(format!("s{i}"))).collect();
                let long: Vec<_> = (0..7).map(|i| Message::user(format!("l{i}"))).collect();
                repo.replace_history("c1", short.clone()).unwrap();

                std::thread::scope(|scope| {
                    scope.spawn(|| {
                        for i in 0..200 {
                            let next = if i % 2 == 0 { long.clone() } else { short.clone() };
                            repo.replace_history("c1", next).unwrap();
                        }
                    });
                    for _ in 0..4 {
                        scope.spawn(|| {
                            for _ in 0..200 {
                                let history = repo.get_history("c1").unwrap();
                                assert!(
                                    history == short || history == long,
                                    "observed a partial history of {} messages",
                                    history.len()
                                );
                            }
                        });
                    }
                });
            }

            #[test]
            fn conversations_are_isolated() {
                let repo = $factory;
                repo.init_conversation("b", Message::system("B")).unwrap();
                repo.add_message("b", Message::user("b1")).unwrap();
                let before = repo.get_history("b").unwrap();

                repo.init_conversation("a", Message::system("A")).unwrap();
                repo.add_message("a", Message::user("a1")).unwrap();
                repo.update_system_prompt("a", "A2").unwrap();
                repo.replace_history("a", vec![Message::user("only")]).unwrap();
                repo.set_format("a", ResponseFormat::Markdown).unwrap();

                assert_eq!(repo.get_history("b").unwrap(), before);
                assert_eq!(repo.get_format("b").unwrap(), None);
            }

            #[test]
            fn settings_default_to_unset_and_round_trip() {
                let repo = $factory;
                assert_eq!(repo.get_format("c1").unwrap(), None);
                assert_eq!(repo.get_collection_settings("c1").unwrap(), None);
                assert_eq!(repo.get_compression_settings("c1").unwrap(), None);

                let format = ResponseFormat::Json {
                    schema: Some(serde_json::json!({"type": "object"})),
                };
                let collection = CollectionSettings::multiple(["docs", "wiki"]);
                let compression = CompressionSettings::enabled(10, 4);
                repo.set_format("c1", format.clone()).unwrap();
                repo.set_collection_settings("c1", collection.clone()).unwrap();
                repo.set_compression_settings("c1", compression).unwrap();

                assert_eq!(repo.get_format("c1").unwrap(), Some(format));
                assert_eq!(repo.get_collection_settings("c1").unwrap(), Some(collection));
                assert_eq!(repo.get_compression_settings("c1").unwrap(), Some(compression));

                repo.set_format("c1", ResponseFormat::Text).unwrap();
                assert_eq!(repo.get_format("c1").unwrap(), Some(ResponseFormat::Text));
            }

            #[test]
            fn lists_conversation_ids() {
                let repo = $factory;
                repo.add_message("b", Message::user("x")).unwrap();
                repo.init_conversation("a", Message::system("S")).unwrap();
                assert_eq!(
                    repo.conversation_ids().unwrap(),
                    vec!["a".to_string(), "b".to_string()]
                );
            }
        }
    };
}
