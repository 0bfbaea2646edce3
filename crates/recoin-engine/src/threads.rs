use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{instrument, warn};

use recoin_core::errors::ChatError;
use recoin_core::events::ChatEvent;
use recoin_core::identity::ItemRef;
use recoin_core::ids::{ConversationId, UserId};
use recoin_core::pair::ParticipantPair;
use recoin_store::conversations::{ConversationRepo, ConversationRow, ConversationStatus};
use recoin_store::messages::{MessageRepo, MessageRow};
use recoin_store::{Database, StoreError};

use crate::error::EngineError;

/// What a send produced: the conversation with its fresh tail, the
/// appended message, and whether this send opened the thread.
#[derive(Clone, Debug)]
pub struct SendOutcome {
    pub conversation: ConversationRow,
    pub message: MessageRow,
    pub created: bool,
}

/// Per-(pair, item) creation lock.
/// Serializes lookup-then-create so one process cannot race itself into
/// the index conflict; the index stays as the cross-process backstop.
struct ThreadLocks {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl ThreadLocks {
    fn new() -> Self {
        Self {
            locks: HashMap::new(),
        }
    }

    fn get(&mut self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Orchestrates conversation routing and the message log: resolves or
/// creates the thread for each send, appends under lock, tracks each
/// user's selected conversation, and emits events for every mutation.
pub struct ThreadEngine {
    conversation_repo: ConversationRepo,
    message_repo: MessageRepo,
    event_tx: broadcast::Sender<ChatEvent>,
    thread_locks: Mutex<ThreadLocks>,
    selections: DashMap<UserId, ConversationId>,
}

impl ThreadEngine {
    pub fn new(db: Database, event_tx: broadcast::Sender<ChatEvent>) -> Self {
        Self {
            conversation_repo: ConversationRepo::new(db.clone()),
            message_repo: MessageRepo::new(db),
            event_tx,
            thread_locks: Mutex::new(ThreadLocks::new()),
            selections: DashMap::new(),
        }
    }

    fn send_event(&self, event: ChatEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("no event receivers, event dropped");
        }
    }

    /// Send a message about an item.
    ///
    /// Routes to the open conversation for the unordered (sender,
    /// receiver) pair and item, creating it when none exists, then
    /// appends. The thread becomes the sender's selection. If another
    /// writer creates the thread between our lookup and insert, the
    /// index conflict is swallowed and the message lands in the winner.
    #[instrument(skip(self, content), fields(sender_id = %sender_id, receiver_id = %receiver_id, item_id = %item.id))]
    pub fn send_message(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        item: &ItemRef,
        content: &str,
    ) -> Result<SendOutcome, EngineError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation("message content is empty".into()).into());
        }
        let pair = ParticipantPair::new(sender_id.clone(), receiver_id.clone())?;

        let lock_key = format!("{}#{}", pair.key(), item.id.as_str());
        let lock = self.thread_locks.lock().get(&lock_key);
        let _guard = lock.lock();

        let (conversation, created) = match self.conversation_repo.find_open(&pair, &item.id)? {
            Some(existing) => (existing, false),
            None => match self.conversation_repo.create(&pair, item) {
                Ok(conv) => (conv, true),
                Err(StoreError::Conflict(_)) => {
                    match self.conversation_repo.find_open(&pair, &item.id)? {
                        Some(winner) => (winner, false),
                        None => {
                            return Err(EngineError::Internal(
                                "open conversation vanished during conflict recovery".into(),
                            ))
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            },
        };

        let message = self
            .message_repo
            .append(&conversation.id, sender_id, receiver_id, content)?;

        if created {
            self.send_event(ChatEvent::ConversationCreated {
                conversation_id: conversation.id.clone(),
                initiator_id: conversation.initiator_id.clone(),
                peer_id: conversation.peer_id.clone(),
                item_id: conversation.item_id.clone(),
                item_kind: conversation.item_kind,
            });
        }
        self.send_event(ChatEvent::MessageSent {
            conversation_id: conversation.id.clone(),
            message_id: message.id.clone(),
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
        });

        self.selections
            .insert(sender_id.clone(), conversation.id.clone());

        // Refetch so the returned row carries the tail we just wrote.
        let conversation = self.conversation_repo.get(&conversation.id)?;
        Ok(SendOutcome {
            conversation,
            message,
            created,
        })
    }

    /// Resolve a conversation. One-way: there is no reopen anywhere in
    /// the API. Idempotent: resolving a resolved thread is a no-op.
    /// Clears the caller's selection when it pointed at this thread.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, user_id = %caller_id))]
    pub fn resolve(
        &self,
        caller_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<(), EngineError> {
        let transitioned = self.conversation_repo.resolve(conversation_id)?;

        self.selections
            .remove_if(caller_id, |_, selected| selected == conversation_id);

        if transitioned {
            self.send_event(ChatEvent::ConversationResolved {
                conversation_id: conversation_id.clone(),
            });
        }
        Ok(())
    }

    /// Set or clear the caller's selected conversation. Only open
    /// threads the caller participates in are selectable.
    pub fn select(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
    ) -> Result<Option<ConversationRow>, EngineError> {
        let Some(id) = conversation_id else {
            self.selections.remove(user_id);
            return Ok(None);
        };

        let conversation = self.conversation_repo.get(id)?;
        if !conversation.involves(user_id) {
            return Err(ChatError::Validation(
                "user is not a participant in this conversation".into(),
            )
            .into());
        }
        if !conversation.is_open() {
            return Err(ChatError::Validation("conversation is resolved".into()).into());
        }
        self.selections.insert(user_id.clone(), id.clone());
        Ok(Some(conversation))
    }

    /// The caller's selected conversation, hydrated. A selection left
    /// dangling by the other participant's resolve is dropped here.
    pub fn active_conversation(
        &self,
        user_id: &UserId,
    ) -> Result<Option<ConversationRow>, EngineError> {
        let selected = match self.selections.get(user_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };

        let conversation = self.conversation_repo.get(&selected)?;
        if !conversation.is_open() {
            self.selections.remove_if(user_id, |_, v| v == &selected);
            return Ok(None);
        }
        Ok(Some(conversation))
    }

    /// Conversations the user participates in, oldest first.
    pub fn conversations_for(
        &self,
        user_id: &UserId,
        include_resolved: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationRow>, EngineError> {
        let status = (!include_resolved).then_some(ConversationStatus::Open);
        Ok(self
            .conversation_repo
            .list_for_user(user_id, status.as_ref(), limit, offset)?)
    }

    /// A conversation's log in append order. Unknown threads are an
    /// error, not an empty log.
    pub fn messages(
        &self,
        conversation_id: &ConversationId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<MessageRow>, EngineError> {
        self.conversation_repo.get(conversation_id)?;
        Ok(self.message_repo.list(conversation_id, limit, offset)?)
    }

    /// Acknowledge everything addressed to `reader_id` in a thread.
    /// Returns how many read flags flipped.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, reader_id = %reader_id))]
    pub fn mark_read(
        &self,
        reader_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<u64, EngineError> {
        let conversation = self.conversation_repo.get(conversation_id)?;
        if !conversation.involves(reader_id) {
            return Err(ChatError::Validation(
                "user is not a participant in this conversation".into(),
            )
            .into());
        }

        let flipped = self.message_repo.mark_read(conversation_id, reader_id)?;
        if flipped > 0 {
            self.send_event(ChatEvent::MessagesRead {
                conversation_id: conversation_id.clone(),
                reader_id: reader_id.clone(),
                count: flipped,
            });
        }
        Ok(flipped)
    }

    /// Open conversations whose latest message is addressed to the user
    /// and unread. Derived per call; nothing is cached.
    pub fn unread_count(&self, user_id: &UserId) -> Result<i64, EngineError> {
        Ok(self.conversation_repo.unread_count(user_id)?)
    }
}
