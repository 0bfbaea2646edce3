use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, ItemId, MessageId, UserId};
use crate::identity::ItemKind;

/// Events emitted by the thread engine over its broadcast channel.
///
/// Consumers (the WebSocket bridge, notification surfaces) subscribe and
/// render these however they like; the engine never waits on delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "conversation_created")]
    ConversationCreated {
        conversation_id: ConversationId,
        initiator_id: UserId,
        peer_id: UserId,
        item_id: ItemId,
        item_kind: ItemKind,
    },

    #[serde(rename = "message_sent")]
    MessageSent {
        conversation_id: ConversationId,
        message_id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
    },

    #[serde(rename = "conversation_resolved")]
    ConversationResolved { conversation_id: ConversationId },

    #[serde(rename = "messages_read")]
    MessagesRead {
        conversation_id: ConversationId,
        reader_id: UserId,
        count: u64,
    },
}

impl ChatEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::ConversationCreated { conversation_id, .. }
            | Self::MessageSent { conversation_id, .. }
            | Self::ConversationResolved { conversation_id }
            | Self::MessagesRead { conversation_id, .. } => conversation_id,
        }
    }

    /// The wire tag, matching the serde rename.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConversationCreated { .. } => "conversation_created",
            Self::MessageSent { .. } => "message_sent",
            Self::ConversationResolved { .. } => "conversation_resolved",
            Self::MessagesRead { .. } => "messages_read",
        }
    }
}
