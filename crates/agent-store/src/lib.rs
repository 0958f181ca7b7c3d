//! # agent-store
//!
//! Durable conversation storage for the agent. [`SqliteConversationRepository`]
//! implements the same `ConversationRepository` contract as the in-memory
//! backend, with every mutation running in its own transaction.

pub mod error;
pub mod sqlite;

pub use error::StoreError;
pub use sqlite::SqliteConversationRepository;
