//! System prompt rendering

use std::fmt::Write as _;

use crate::settings::{CollectionMode, CollectionSettings};

/// Renders the system prompt for a conversation
pub trait PromptBuilder: Send + Sync {
    fn build(&self, collection: Option<&CollectionSettings>) -> String;
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.

Use the available tools when they help answer the user's request.
After receiving tool results, synthesize them into a helpful response.
If you can answer directly without tools, do so.
Be concise and accurate.";

/// Base prompt plus a section naming the knowledge collections in scope
#[derive(Clone, Debug)]
pub struct DefaultPromptBuilder {
    base: String,
}

impl Default for DefaultPromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl DefaultPromptBuilder {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, collection: Option<&CollectionSettings>) -> String {
        let mut prompt = self.base.clone();

        let Some(settings) = collection else {
            return prompt;
        };

        match settings.mode {
            CollectionMode::None => {}
            CollectionMode::All => {
                prompt.push_str(
                    "\n\n## Knowledge\nSearch across all document collections when relevant.",
                );
            }
            CollectionMode::Single | CollectionMode::Multiple
                if settings.collections.is_empty() => {}
            CollectionMode::Single | CollectionMode::Multiple => {
                prompt.push_str(
                    "\n\n## Knowledge\nRestrict document searches to these collections:\n",
                );
                for name in &settings.collections {
                    let _ = writeln!(prompt, "- {name}");
                }
                prompt.truncate(prompt.trim_end().len());
            }
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_settings_is_base() {
        let builder = DefaultPromptBuilder::new("base");
        assert_eq!(builder.build(None), "base");
        assert_eq!(builder.build(Some(&CollectionSettings::default())), "base");
    }

    #[test]
    fn test_lists_collections() {
        let builder = DefaultPromptBuilder::new("base");
        let prompt = builder.build(Some(&CollectionSettings::multiple(["docs", "wiki"])));
        assert!(prompt.starts_with("base\n\n## Knowledge"));
        assert!(prompt.ends_with("- docs\n- wiki"));
    }

    #[test]
    fn test_all_collections() {
        let settings = CollectionSettings {
            mode: CollectionMode::All,
            collections: Vec::new(),
        };
        let prompt = DefaultPromptBuilder::default().build(Some(&settings));
        assert!(prompt.contains("all document collections"));
    }
}
