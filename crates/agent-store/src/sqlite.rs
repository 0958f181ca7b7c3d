//! SQLite conversation repository
//!
//! Messages are stored one row per message, keyed by `(conversation_id, seq)`
//! with the message itself as a JSON body. Settings live in a side table
//! that does not require the conversation to exist.

use std::path::Path;

use agent_core::message::{Message, Role};
use agent_core::repository::ConversationRepository;
use agent_core::settings::{CollectionSettings, CompressionSettings, ResponseFormat};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id          TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    seq             INTEGER NOT NULL,
    body            TEXT NOT NULL,
    PRIMARY KEY (conversation_id, seq)
);

CREATE TABLE IF NOT EXISTS conversation_settings (
    conversation_id      TEXT PRIMARY KEY,
    response_format      TEXT,
    collection_settings  TEXT,
    compression_settings TEXT
);
";

/// Per-conversation setting columns
#[derive(Clone, Copy, Debug)]
enum Setting {
    Format,
    Collection,
    Compression,
}

impl Setting {
    const fn column(self) -> &'static str {
        match self {
            Self::Format => "response_format",
            Self::Collection => "collection_settings",
            Self::Compression => "compression_settings",
        }
    }
}

/// Conversation repository over a single SQLite connection.
///
/// Thread-safe via an internal `Mutex<Connection>`. Every mutating
/// operation runs in one transaction, so readers never see a partial
/// `replace_history`.
pub struct SqliteConversationRepository {
    conn: Mutex<Connection>,
}

impl SqliteConversationRepository {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let repo = Self::with_schema(conn)?;

        info!(path = %path.display(), "Opened conversation database");
        Ok(repo)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        f(&self.conn.lock())
    }

    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn put_setting<T: Serialize>(&self, id: &str, setting: Setting, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let column = setting.column();
        self.write(|tx| {
            tx.execute(
                &format!(
                    "INSERT INTO conversation_settings (conversation_id, {column}) VALUES (?1, ?2)
                     ON CONFLICT(conversation_id) DO UPDATE SET {column} = excluded.{column}"
                ),
                params![id, json],
            )?;
            Ok(())
        })
    }

    fn get_setting<T: DeserializeOwned>(&self, id: &str, setting: Setting) -> Result<Option<T>> {
        let column = setting.column();
        let raw: Option<Option<String>> = self.read(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {column} FROM conversation_settings WHERE conversation_id = ?1"
                    ),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        Ok(raw.flatten().map(|json| serde_json::from_str(&json)).transpose()?)
    }
}

/// Insert the conversation row, or bump its `updated_at`
fn touch_conversation(conn: &Connection, id: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)
         ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
        params![id, now],
    )?;
    Ok(())
}

fn next_seq(conn: &Connection, id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(seq) + 1, 0) FROM messages WHERE conversation_id = ?1",
        params![id],
        |row| row.get(0),
    )?)
}

fn insert_messages(conn: &Connection, id: &str, mut seq: i64, messages: &[Message]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached("INSERT INTO messages (conversation_id, seq, body) VALUES (?1, ?2, ?3)")?;
    for message in messages {
        stmt.execute(params![id, seq, serde_json::to_string(message)?])?;
        seq += 1;
    }
    Ok(())
}

impl ConversationRepository for SqliteConversationRepository {
    fn has_conversation(&self, id: &str) -> agent_core::Result<bool> {
        Ok(self.read(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?)
        })?)
    }

    fn init_conversation(&self, id: &str, system_message: Message) -> agent_core::Result<()> {
        let created = self.write(|tx| {
            let now = Utc::now().to_rfc3339();
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO conversations (id, created_at, updated_at)
                 VALUES (?1, ?2, ?2)",
                params![id, now],
            )?;
            if inserted == 1 {
                insert_messages(tx, id, 0, std::slice::from_ref(&system_message))?;
            }
            Ok(inserted == 1)
        })?;

        if created {
            debug!(conversation_id = %id, "Created conversation");
        }
        Ok(())
    }

    fn get_history(&self, id: &str) -> agent_core::Result<Vec<Message>> {
        Ok(self.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT body FROM messages WHERE conversation_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;

            let mut history: Vec<Message> = Vec::new();
            for body in rows {
                history.push(serde_json::from_str(&body?)?);
            }
            Ok(history)
        })?)
    }

    fn add_messages(&self, id: &str, messages: Vec<Message>) -> agent_core::Result<()> {
        let count = messages.len();
        self.write(|tx| {
            touch_conversation(tx, id)?;
            let seq = next_seq(tx, id)?;
            insert_messages(tx, id, seq, &messages)
        })?;

        debug!(conversation_id = %id, count, "Appended messages");
        Ok(())
    }

    fn update_system_prompt(&self, id: &str, text: &str) -> agent_core::Result<()> {
        Ok(self.write(|tx| {
            let first: Option<(i64, String)> = tx
                .query_row(
                    "SELECT seq, body FROM messages
                     WHERE conversation_id = ?1 ORDER BY seq LIMIT 1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((seq, body)) = first else {
                return Ok(());
            };
            let mut message: Message = serde_json::from_str(&body)?;
            if message.role != Role::System {
                return Ok(());
            }

            message.content = Some(text.to_string());
            tx.execute(
                "UPDATE messages SET body = ?3 WHERE conversation_id = ?1 AND seq = ?2",
                params![id, seq, serde_json::to_string(&message)?],
            )?;
            touch_conversation(tx, id)
        })?)
    }

    fn replace_history(&self, id: &str, messages: Vec<Message>) -> agent_core::Result<()> {
        let count = messages.len();
        self.write(|tx| {
            touch_conversation(tx, id)?;
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
            insert_messages(tx, id, 0, &messages)
        })?;

        debug!(conversation_id = %id, count, "Replaced history");
        Ok(())
    }

    fn set_format(&self, id: &str, format: ResponseFormat) -> agent_core::Result<()> {
        Ok(self.put_setting(id, Setting::Format, &format)?)
    }

    fn get_format(&self, id: &str) -> agent_core::Result<Option<ResponseFormat>> {
        Ok(self.get_setting(id, Setting::Format)?)
    }

    fn set_collection_settings(
        &self,
        id: &str,
        settings: CollectionSettings,
    ) -> agent_core::Result<()> {
        Ok(self.put_setting(id, Setting::Collection, &settings)?)
    }

    fn get_collection_settings(&self, id: &str) -> agent_core::Result<Option<CollectionSettings>> {
        Ok(self.get_setting(id, Setting::Collection)?)
    }

    fn set_compression_settings(
        &self,
        id: &str,
        settings: CompressionSettings,
    ) -> agent_core::Result<()> {
        Ok(self.put_setting(id, Setting::Compression, &settings)?)
    }

    fn get_compression_settings(
        &self,
        id: &str,
    ) -> agent_core::Result<Option<CompressionSettings>> {
        Ok(self.get_setting(id, Setting::Compression)?)
    }

    fn conversation_ids(&self) -> agent_core::Result<Vec<String>> {
        Ok(self.read(|conn| {
            let mut stmt = conn.prepare_cached("SELECT id FROM conversations ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for id in rows {
                ids.push(id?);
            }
            Ok(ids)
        })?)
    }
}
