//! History compression
//!
//! The [`HistoryCompressor`] replaces an older window of a conversation with
//! a single summary message while preserving the system message and the
//! most recent messages verbatim. The summary text comes from the LLM
//! client; this module decides when to compress, which window to summarize
//! and how to splice the result back in.

use std::fmt::Write as _;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AgentError, Result};
use crate::message::{Message, Role, estimate_tokens};
use crate::provider::{LlmClient, ModelRequest};
use crate::repository::ConversationRepository;
use crate::settings::CompressionSettings;

/// Marks the synthetic message standing in for summarized history
pub const SUMMARY_PREFIX: &str = "[Summary of earlier conversation]";

const SUMMARY_PROMPT: &str = "\
Summarize the earlier portion of this conversation concisely. Focus on:
- Key topics discussed and decisions made
- Results returned by tools that are still relevant
- Any pending items or questions raised

Provide a clear, factual summary in 1-2 paragraphs. The summary will replace \
the earlier messages while the most recent exchanges are preserved verbatim.";

/// Result of a compression attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionOutcome {
    /// Whether the history was replaced
    pub compressed: bool,
    /// History length before compression
    pub original_count: usize,
    /// History length after compression
    pub compressed_count: usize,
    /// Generated summary text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Size-based estimate of tokens removed from the context
    pub estimated_tokens_saved: usize,
}

impl CompressionOutcome {
    const fn skipped(count: usize) -> Self {
        Self {
            compressed: false,
            original_count: count,
            compressed_count: count,
            summary: None,
            estimated_tokens_saved: 0,
        }
    }
}

/// Which part of a history gets summarized
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionPlan {
    /// Whether `history[0]` is a system message kept in place
    pub keeps_system: bool,
    /// Messages replaced by the summary
    pub head: Range<usize>,
    /// Index of the first message kept verbatim
    pub tail_start: usize,
}

/// Summarize-and-splice compression policy
#[derive(Clone)]
pub struct HistoryCompressor {
    client: Arc<dyn LlmClient>,
}

impl HistoryCompressor {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    /// Decide whether and where to compress. `None` means leave history alone.
    ///
    /// The tail never starts with a tool result: the split moves back to the
    /// assistant message that issued the calls so every result stays paired.
    pub fn plan(history: &[Message], settings: &CompressionSettings) -> Option<CompressionPlan> {
        let len = history.len();
        if !settings.enabled || len <= settings.message_threshold {
            return None;
        }

        let keeps_system = history.first().is_some_and(|m| m.role == Role::System);
        let start = usize::from(keeps_system);
        if settings.keep_recent_messages >= len - start {
            return None;
        }

        let mut split = len - settings.keep_recent_messages;
        // keep_recent_messages == 0 leaves split == len: an empty tail
        while split > start && history.get(split).is_some_and(|m| m.role == Role::Tool) {
            split -= 1;
        }
        if split <= start {
            return None;
        }

        Some(CompressionPlan {
            keeps_system,
            head: start..split,
            tail_start: split,
        })
    }

    /// Compress the conversation if its settings call for it.
    ///
    /// Callers must serialize this with other writes to the same conversation.
    pub async fn compress(
        &self,
        repository: &dyn ConversationRepository,
        conversation_id: &str,
        settings: &CompressionSettings,
    ) -> Result<CompressionOutcome> {
        let history = repository.get_history(conversation_id)?;
        let Some(plan) = Self::plan(&history, settings) else {
            return Ok(CompressionOutcome::skipped(history.len()));
        };

        let head = &history[plan.head.clone()];
        let summary = self.summarize(head).await?;
        let summary_message = Message::assistant(format!("{SUMMARY_PREFIX}\n{summary}"));
        let estimated_tokens_saved =
            estimate_tokens(head).saturating_sub(summary_message.estimate_tokens());

        let mut compressed = Vec::with_capacity(history.len() - head.len() + 1);
        if plan.keeps_system {
            compressed.push(history[0].clone());
        }
        compressed.push(summary_message);
        compressed.extend_from_slice(&history[plan.tail_start..]);

        let outcome = CompressionOutcome {
            compressed: true,
            original_count: history.len(),
            compressed_count: compressed.len(),
            summary: Some(summary),
            estimated_tokens_saved,
        };

        repository.replace_history(conversation_id, compressed)?;

        info!(
            conversation_id = %conversation_id,
            before = outcome.original_count,
            after = outcome.compressed_count,
            tokens_saved = outcome.estimated_tokens_saved,
            "Compressed conversation history"
        );

        Ok(outcome)
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String> {
        let request = ModelRequest::new(SUMMARY_PROMPT, vec![Message::user(transcript(messages))]);
        let response = self.client.send(&request).await?;

        response
            .content
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AgentError::Provider("model returned an empty summary".into()))
    }
}

/// Format messages as a conversation transcript
fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let mut line = format!("[{}] {}", m.role, m.text());
            for call in m.tool_calls() {
                let _ = write!(line, "\n(called {} with {})", call.name, call.arguments);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
