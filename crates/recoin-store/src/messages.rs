use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use recoin_core::ids::{ConversationId, MessageId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A stored message. Immutable after append except for the read flag,
/// which only a receiver-side acknowledgement may flip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub read: bool,
    pub sequence: i64,
    pub timestamp: String,
}

/// Per-conversation append lock.
/// Keeps sequence assignment and the tail pointer from interleaving.
struct ConversationLocks {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl ConversationLocks {
    fn new() -> Self {
        Self {
            locks: HashMap::new(),
        }
    }

    fn get(&mut self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct MessageRepo {
    db: Database,
    conversation_locks: Mutex<ConversationLocks>,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            conversation_locks: Mutex::new(ConversationLocks::new()),
        }
    }

    /// Append a message to a conversation's log. Atomically:
    /// 1. Acquires the per-conversation lock
    /// 2. Reads the current max sequence
    /// 3. Inserts the message with the next sequence, unread
    /// 4. Advances the conversation's last_message_id
    #[instrument(skip(self, content), fields(conversation_id = %conversation_id, sender_id = %sender_id))]
    pub fn append(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        receiver_id: &UserId,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        let lock = self.conversation_locks.lock().get(conversation_id.as_str());
        let _guard = lock.lock();

        self.db.with_conn(|conn| {
            // Also verifies the conversation exists: no row, no append.
            let max_seq: i64 = conn
                .query_row(
                    "SELECT COALESCE((SELECT MAX(sequence) FROM messages WHERE conversation_id = ?1), -1)
                     FROM conversations WHERE id = ?1",
                    [conversation_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|_| StoreError::NotFound(format!("conversation {conversation_id}")))?;

            let message_id = MessageId::new();
            let now = Utc::now().to_rfc3339();
            let sequence = max_seq + 1;

            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, read, sequence, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
                rusqlite::params![
                    message_id.as_str(),
                    conversation_id.as_str(),
                    sender_id.as_str(),
                    receiver_id.as_str(),
                    content,
                    sequence,
                    now,
                ],
            )?;

            conn.execute(
                "UPDATE conversations SET last_message_id = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![message_id.as_str(), now, conversation_id.as_str()],
            )?;

            Ok(MessageRow {
                id: message_id,
                conversation_id: conversation_id.clone(),
                sender_id: sender_id.clone(),
                receiver_id: receiver_id.clone(),
                content: content.to_string(),
                read: false,
                sequence,
                timestamp: now,
            })
        })
    }

    /// List a conversation's log in append order.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list(
        &self,
        conversation_id: &ConversationId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let limit = limit.unwrap_or(1000);
            let offset = offset.unwrap_or(0);
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, receiver_id, content, read, sequence, timestamp
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY sequence ASC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let mut rows = stmt.query(rusqlite::params![conversation_id.as_str(), limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Mark every message addressed to `reader` in this conversation as
    /// read. Returns how many flags flipped. Messages the reader sent are
    /// untouched; senders cannot acknowledge their own messages.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, reader_id = %reader_id))]
    pub fn mark_read(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
    ) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1
                 WHERE conversation_id = ?1 AND receiver_id = ?2 AND read = 0",
                rusqlite::params![conversation_id.as_str(), reader_id.as_str()],
            )?;
            Ok(changed as u64)
        })
    }

    /// Count messages in a conversation.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn count(&self, conversation_id: &ConversationId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    Ok(MessageRow {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        conversation_id: ConversationId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "messages",
            "conversation_id",
        )?),
        sender_id: UserId::from_raw(row_helpers::get::<String>(row, 2, "messages", "sender_id")?),
        receiver_id: UserId::from_raw(row_helpers::get::<String>(row, 3, "messages", "receiver_id")?),
        content: row_helpers::get(row, 4, "messages", "content")?,
        read: row_helpers::get::<i64>(row, 5, "messages", "read")? != 0,
        sequence: row_helpers::get(row, 6, "messages", "sequence")?,
        timestamp: row_helpers::get(row, 7, "messages", "timestamp")?,
    })
}
