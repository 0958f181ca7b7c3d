//! Per-conversation settings
//!
//! Side-table values a conversation may carry alongside its history.
//! All of them are unset until written.

use serde::{Deserialize, Serialize};

/// Shape the assistant's answers should take
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Plain prose
    Text,
    /// Markdown formatting allowed
    Markdown,
    /// A single JSON document, optionally matching a schema
    Json {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<serde_json::Value>,
    },
}

impl ResponseFormat {
    /// Instruction appended to the system prompt for this format
    pub fn instruction(&self) -> String {
        match self {
            Self::Text => "Respond in plain text without markup.".into(),
            Self::Markdown => "Format your response using Markdown.".into(),
            Self::Json { schema: None } => {
                "Respond with a single valid JSON document and nothing else.".into()
            }
            Self::Json {
                schema: Some(schema),
            } => format!(
                "Respond with a single valid JSON document matching this schema and nothing \
                 else:\n{schema}"
            ),
        }
    }
}

/// Which knowledge collections the assistant may draw on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
    #[default]
    None,
    Single,
    Multiple,
    All,
}

/// Collection selection for a conversation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSettings {
    /// Selection mode
    #[serde(default)]
    pub mode: CollectionMode,

    /// Named collections (ignored for `None` and `All`)
    #[serde(default)]
    pub collections: Vec<String>,
}

impl CollectionSettings {
    pub fn single(collection: impl Into<String>) -> Self {
        Self {
            mode: CollectionMode::Single,
            collections: vec![collection.into()],
        }
    }

    pub fn multiple(collections: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode: CollectionMode::Multiple,
            collections: collections.into_iter().map(Into::into).collect(),
        }
    }
}

/// History compression policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// Whether compression may run at all
    #[serde(default)]
    pub enabled: bool,

    /// History length above which compression runs
    #[serde(default = "default_message_threshold")]
    pub message_threshold: usize,

    /// Number of most recent messages kept verbatim
    #[serde(default = "default_keep_recent")]
    pub keep_recent_messages: usize,
}

const fn default_message_threshold() -> usize {
    20
}

const fn default_keep_recent() -> usize {
    6
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            message_threshold: default_message_threshold(),
            keep_recent_messages: default_keep_recent(),
        }
    }
}

impl CompressionSettings {
    /// Enabled policy with the given threshold and tail size
    pub const fn enabled(message_threshold: usize, keep_recent_messages: usize) -> Self {
        Self {
            enabled: true,
            message_threshold,
            keep_recent_messages,
        }
    }
}
