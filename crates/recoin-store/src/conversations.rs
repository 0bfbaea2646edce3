use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use recoin_core::ids::{ConversationId, ItemId, MessageId, UserId};
use recoin_core::identity::{ItemKind, ItemRef};
use recoin_core::pair::ParticipantPair;

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRow;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Resolved,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

/// A stored conversation, with the tail of its log hydrated.
///
/// `last_message` comes from the pointer column written in the same
/// critical section as every append, so it always equals the highest
/// sequence in the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub initiator_id: UserId,
    pub peer_id: UserId,
    pub pair_key: String,
    pub item_id: ItemId,
    pub item_kind: ItemKind,
    pub status: ConversationStatus,
    pub last_message: Option<MessageRow>,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversationRow {
    pub fn is_open(&self) -> bool {
        self.status == ConversationStatus::Open
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.initiator_id == user || &self.peer_id == user
    }

    /// The participant opposite `user`, if `user` is in this conversation.
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        if user == &self.initiator_id {
            Some(&self.peer_id)
        } else if user == &self.peer_id {
            Some(&self.initiator_id)
        } else {
            None
        }
    }
}

pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new open conversation.
    ///
    /// The partial unique index on (pair_key, item_id) WHERE status='open'
    /// turns a duplicate insert into StoreError::Conflict, which is the
    /// compare-and-swap the engine relies on when two writers race.
    #[instrument(skip(self, pair, item), fields(pair_key = %pair.key(), item_id = %item.id))]
    pub fn create(
        &self,
        pair: &ParticipantPair,
        item: &ItemRef,
    ) -> Result<ConversationRow, StoreError> {
        let id = ConversationId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, initiator_id, peer_id, pair_key, item_id, item_kind, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'open', ?7, ?8)",
                rusqlite::params![
                    id.as_str(),
                    pair.initiator().as_str(),
                    pair.peer().as_str(),
                    pair.key(),
                    item.id.as_str(),
                    item.kind.to_string(),
                    now,
                    now,
                ],
            )?;

            Ok(ConversationRow {
                id,
                initiator_id: pair.initiator().clone(),
                peer_id: pair.peer().clone(),
                pair_key: pair.key(),
                item_id: item.id.clone(),
                item_kind: item.kind,
                status: ConversationStatus::Open,
                last_message: None,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    /// Get a conversation by ID.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: &ConversationId) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.initiator_id, c.peer_id, c.pair_key, c.item_id, c.item_kind,
                        c.status, c.created_at, c.updated_at,
                        m.id, m.sender_id, m.receiver_id, m.content, m.read, m.sequence, m.timestamp
                 FROM conversations c
                 LEFT JOIN messages m ON m.id = c.last_message_id
                 WHERE c.id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_conversation(row),
                None => Err(StoreError::NotFound(format!("conversation {id}"))),
            }
        })
    }

    /// Look up the open conversation for an unordered pair and item.
    ///
    /// Symmetric by construction: both (A, B) and (B, A) produce the same
    /// pair key.
    #[instrument(skip(self, pair), fields(pair_key = %pair.key(), item_id = %item_id))]
    pub fn find_open(
        &self,
        pair: &ParticipantPair,
        item_id: &ItemId,
    ) -> Result<Option<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.initiator_id, c.peer_id, c.pair_key, c.item_id, c.item_kind,
                        c.status, c.created_at, c.updated_at,
                        m.id, m.sender_id, m.receiver_id, m.content, m.read, m.sequence, m.timestamp
                 FROM conversations c
                 LEFT JOIN messages m ON m.id = c.last_message_id
                 WHERE c.pair_key = ?1 AND c.item_id = ?2 AND c.status = 'open'",
            )?;
            let mut rows = stmt.query(rusqlite::params![pair.key(), item_id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_conversation(row)?)),
                None => Ok(None),
            }
        })
    }

    /// List conversations a user participates in, oldest first.
    ///
    /// Creation order matches how the consumer renders its inbox: new
    /// threads append to the end.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_for_user(
        &self,
        user_id: &UserId,
        status: Option<&ConversationStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let (sql, params) = match status {
                Some(s) => (
                    "SELECT c.id, c.initiator_id, c.peer_id, c.pair_key, c.item_id, c.item_kind,
                            c.status, c.created_at, c.updated_at,
                            m.id, m.sender_id, m.receiver_id, m.content, m.read, m.sequence, m.timestamp
                     FROM conversations c
                     LEFT JOIN messages m ON m.id = c.last_message_id
                     WHERE (c.initiator_id = ?1 OR c.peer_id = ?1) AND c.status = ?2
                     ORDER BY c.created_at ASC LIMIT ?3 OFFSET ?4",
                    vec![
                        user_id.as_str().to_string(),
                        s.to_string(),
                        limit.to_string(),
                        offset.to_string(),
                    ],
                ),
                None => (
                    "SELECT c.id, c.initiator_id, c.peer_id, c.pair_key, c.item_id, c.item_kind,
                            c.status, c.created_at, c.updated_at,
                            m.id, m.sender_id, m.receiver_id, m.content, m.read, m.sequence, m.timestamp
                     FROM conversations c
                     LEFT JOIN messages m ON m.id = c.last_message_id
                     WHERE c.initiator_id = ?1 OR c.peer_id = ?1
                     ORDER BY c.created_at ASC LIMIT ?2 OFFSET ?3",
                    vec![
                        user_id.as_str().to_string(),
                        limit.to_string(),
                        offset.to_string(),
                    ],
                ),
            };

            let mut stmt = conn.prepare(sql)?;
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
            let mut rows = stmt.query(params_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_conversation(row)?);
            }
            Ok(results)
        })
    }

    /// Mark a conversation resolved. Returns true if this call made the
    /// transition, false if it was already resolved. Resolution is
    /// one-way: nothing in the API sets a conversation back to open.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn resolve(&self, id: &ConversationId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE conversations SET status = 'resolved', updated_at = ?1
                 WHERE id = ?2 AND status = 'open'",
                rusqlite::params![now, id.as_str()],
            )?;
            if changed > 0 {
                return Ok(true);
            }

            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
                [id.as_str()],
                |row| row.get(0),
            )?;
            if exists {
                Ok(false)
            } else {
                Err(StoreError::NotFound(format!("conversation {id}")))
            }
        })
    }

    /// Number of open conversations whose latest message is addressed to
    /// `user_id` and still unread. Computed on demand, never stored.
    ///
    /// Only the tail of each log counts; older unread messages in a
    /// thread whose tail was read do not contribute.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn unread_count(&self, user_id: &UserId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*)
                 FROM conversations c
                 JOIN messages m ON m.id = c.last_message_id
                 WHERE c.status = 'open' AND m.receiver_id = ?1 AND m.read = 0",
                [user_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, StoreError> {
    let status_str: String = row_helpers::get(row, 6, "conversations", "status")?;
    let kind_str: String = row_helpers::get(row, 5, "conversations", "item_kind")?;
    let conversation_id =
        ConversationId::from_raw(row_helpers::get::<String>(row, 0, "conversations", "id")?);

    // Joined message columns are all NULL when the log is empty.
    let last_message = match row_helpers::get_opt::<String>(row, 9, "messages", "id")? {
        Some(message_id) => Some(MessageRow {
            id: MessageId::from_raw(message_id),
            conversation_id: conversation_id.clone(),
            sender_id: UserId::from_raw(row_helpers::get::<String>(row, 10, "messages", "sender_id")?),
            receiver_id: UserId::from_raw(row_helpers::get::<String>(row, 11, "messages", "receiver_id")?),
            content: row_helpers::get(row, 12, "messages", "content")?,
            read: row_helpers::get::<i64>(row, 13, "messages", "read")? != 0,
            sequence: row_helpers::get(row, 14, "messages", "sequence")?,
            timestamp: row_helpers::get(row, 15, "messages", "timestamp")?,
        }),
        None => None,
    };

    Ok(ConversationRow {
        id: conversation_id,
        initiator_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "conversations", "initiator_id")?),
        peer_id: UserId::from_raw(row_helpers::get::<String>(row, 2, "conversations", "peer_id")?),
        pair_key: row_helpers::get(row, 3, "conversations", "pair_key")?,
        item_id: ItemId::from_raw(row_helpers::get::<String>(row, 4, "conversations", "item_id")?),
        item_kind: row_helpers::parse_enum(&kind_str, "conversations", "item_kind")?,
        status: row_helpers::parse_enum(&status_str, "conversations", "status")?,
        last_message,
        created_at: row_helpers::get(row, 7, "conversations", "created_at")?,
        updated_at: row_helpers::get(row, 8, "conversations", "updated_at")?,
    })
}
