//! Tool Executor
//!
//! Runs the batch of tool calls produced by one model turn against the
//! [`ToolRegistry`] and turns each outcome into a tool-result message.

use std::sync::Arc;

use tracing::debug;

use crate::message::{DEFAULT_TOOL_CALL_TYPE, Message, ToolCallRequest};
use crate::tool::ToolRegistry;

/// Coordinates tool call batches over a shared registry
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub const fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this executor dispatches to
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Fill in fields some providers leave out: the type tag and the call id
    pub fn normalize(calls: &mut [ToolCallRequest]) {
        for call in calls {
            if call.call_type.as_deref().is_none_or(str::is_empty) {
                call.call_type = Some(DEFAULT_TOOL_CALL_TYPE.into());
            }
            if call.id.is_empty() {
                call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
        }
    }

    /// Execute every call in order, producing one result message per call.
    ///
    /// Result order always matches request order.
    pub async fn execute_batch(&self, calls: &[ToolCallRequest]) -> Vec<Message> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            debug!(tool = %call.name, call_id = %call.id, "Dispatching tool call");
            let output = self.registry.execute_tool(&call.name, &call.arguments).await;
            results.push(Message::tool_result(call.id.clone(), output));
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::testing::FailingTool;

    #[test]
    fn test_normalize_fills_type_and_id() {
        let mut calls = vec![ToolCallRequest {
            id: String::new(),
            call_type: None,
            name: "echo".into(),
            arguments: "{}".into(),
        }];
        ToolExecutor::normalize(&mut calls);
        assert_eq!(calls[0].call_type.as_deref(), Some("function"));
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_normalize_keeps_existing_values() {
        let mut calls = vec![ToolCallRequest {
            id: "c1".into(),
            call_type: Some("custom".into()),
            name: "echo".into(),
            arguments: "{}".into(),
        }];
        ToolExecutor::normalize(&mut calls);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].call_type.as_deref(), Some("custom"));
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_contains_failures() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(FailingTool::named("broken")));
        let executor = ToolExecutor::new(registry);

        let calls = vec![
            ToolCallRequest::new("a", "echo", r#"{"text":"first"}"#),
            ToolCallRequest::new("b", "broken", "{}"),
            ToolCallRequest::new("c", "missing", "{}"),
            ToolCallRequest::new("d", "echo", r#"{"text":"last"}"#),
        ];
        let results = executor.execute_batch(&calls).await;

        let ids: Vec<_> = results.iter().map(|m| m.tool_call_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(results.iter().all(|m| m.role == Role::Tool));
        assert_eq!(results[0].text(), "first");
        assert!(results[1].text().starts_with("Tool execution error"));
        assert_eq!(results[2].text(), "Tool not found: missing");
        assert_eq!(results[3].text(), "last");
    }
}
