//! Conversation Repository
//!
//! One contract for conversation history and per-conversation settings,
//! shared by every storage backend. Operations never fail on unknown ids:
//! they create the conversation or do nothing. Only backend failures are
//! reported as errors.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::message::{Message, Role};
use crate::settings::{CollectionSettings, CompressionSettings, ResponseFormat};

/// Storage contract for conversations
pub trait ConversationRepository: Send + Sync {
    /// Whether the conversation has a history
    fn has_conversation(&self, id: &str) -> Result<bool>;

    /// Create the conversation with `[system_message]` unless it already exists
    fn init_conversation(&self, id: &str, system_message: Message) -> Result<()>;

    /// Snapshot of the ordered history; empty for unknown ids
    fn get_history(&self, id: &str) -> Result<Vec<Message>>;

    /// Append one message, creating the conversation if needed
    fn add_message(&self, id: &str, message: Message) -> Result<()> {
        self.add_messages(id, vec![message])
    }

    /// Append messages in order, creating the conversation if needed
    fn add_messages(&self, id: &str, messages: Vec<Message>) -> Result<()>;

    /// Replace the content of the first message if it is a system message
    fn update_system_prompt(&self, id: &str, text: &str) -> Result<()>;

    /// Atomically swap the whole history
    fn replace_history(&self, id: &str, messages: Vec<Message>) -> Result<()>;

    fn set_format(&self, id: &str, format: ResponseFormat) -> Result<()>;
    fn get_format(&self, id: &str) -> Result<Option<ResponseFormat>>;

    fn set_collection_settings(&self, id: &str, settings: CollectionSettings) -> Result<()>;
    fn get_collection_settings(&self, id: &str) -> Result<Option<CollectionSettings>>;

    fn set_compression_settings(&self, id: &str, settings: CompressionSettings) -> Result<()>;
    fn get_compression_settings(&self, id: &str) -> Result<Option<CompressionSettings>>;

    /// Ids of every conversation with a history, sorted
    fn conversation_ids(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
struct ConversationSlot {
    /// `None` until the conversation is created
    history: Option<Vec<Message>>,
    format: Option<ResponseFormat>,
    collection: Option<CollectionSettings>,
    compression: Option<CompressionSettings>,
}

/// In-memory repository (for development/testing).
///
/// The outer map lock is held only to look up or insert a slot; each
/// conversation is then guarded by its own lock.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    slots: RwLock<HashMap<String, Arc<RwLock<ConversationSlot>>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Option<Arc<RwLock<ConversationSlot>>> {
        self.slots.read().get(id).cloned()
    }

    fn slot_or_insert(&self, id: &str) -> Arc<RwLock<ConversationSlot>> {
        if let Some(slot) = self.slot(id) {
            return slot;
        }
        Arc::clone(self.slots.write().entry(id.to_string()).or_default())
    }
}

impl ConversationRepository for InMemoryConversationRepository {
    fn has_conversation(&self, id: &str) -> Result<bool> {
        Ok(self.slot(id).is_some_and(|slot| slot.read().history.is_some()))
    }

    fn init_conversation(&self, id: &str, system_message: Message) -> Result<()> {
        let slot = self.slot_or_insert(id);
        let mut slot = slot.write();
        if slot.history.is_none() {
            slot.history = Some(vec![system_message]);
        }
        Ok(())
    }

    fn get_history(&self, id: &str) -> Result<Vec<Message>> {
        Ok(self
            .slot(id)
            .and_then(|slot| slot.read().history.clone())
            .unwrap_or_default())
    }

    fn add_messages(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        let slot = self.slot_or_insert(id);
        slot.write().history.get_or_insert_with(Vec::new).extend(messages);
        Ok(())
    }

    fn update_system_prompt(&self, id: &str, text: &str) -> Result<()> {
        if let Some(slot) = self.slot(id) {
            let mut slot = slot.write();
            if let Some(first) = slot.history.as_mut().and_then(|h| h.first_mut()) {
                if first.role == Role::System {
                    first.content = Some(text.to_string());
                }
            }
        }
        Ok(())
    }

    fn replace_history(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        let slot = self.slot_or_insert(id);
        slot.write().history = Some(messages);
        Ok(())
    }

    fn set_format(&self, id: &str, format: ResponseFormat) -> Result<()> {
        self.slot_or_insert(id).write().format = Some(format);
        Ok(())
    }

    fn get_format(&self, id: &str) -> Result<Option<ResponseFormat>> {
        Ok(self.slot(id).and_then(|slot| slot.read().format.clone()))
    }

    fn set_collection_settings(&self, id: &str, settings: CollectionSettings) -> Result<()> {
        self.slot_or_insert(id).write().collection = Some(settings);
        Ok(())
    }

    fn get_collection_settings(&self, id: &str) -> Result<Option<CollectionSettings>> {
        Ok(self.slot(id).and_then(|slot| slot.read().collection.clone()))
    }

    fn set_compression_settings(&self, id: &str, settings: CompressionSettings) -> Result<()> {
        self.slot_or_insert(id).write().compression = Some(settings);
        Ok(())
    }

    fn get_compression_settings(&self, id: &str) -> Result<Option<CompressionSettings>> {
        Ok(self.slot(id).and_then(|slot| slot.read().compression))
    }

    fn conversation_ids(&self) -> Result<Vec<String>> {
        let slots = self.slots.read();
        let mut ids: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| slot.read().history.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
