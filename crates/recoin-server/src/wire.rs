//! Client wire format.
//!
//! Translates between internal rows/events and the camelCase JSON shapes
//! the web and mobile clients expect.

use serde::Serialize;

use recoin_core::events::ChatEvent;
use recoin_core::identity::AuthenticatedUser;
use recoin_engine::SendOutcome;
use recoin_store::conversations::ConversationRow;
use recoin_store::messages::MessageRow;

// ── Param normalization ──────────────────────────────────────────────────

/// Mapping of client camelCase param keys to Rust snake_case equivalents.
const CAMEL_TO_SNAKE: &[(&str, &str)] = &[
    ("conversationId", "conversation_id"),
    ("receiverId", "receiver_id"),
    ("userId", "user_id"),
    ("itemId", "item_id"),
    ("itemType", "item_type"),
    ("includeResolved", "include_resolved"),
];

/// Normalize client camelCase params to snake_case for Rust handlers.
/// If the snake_case key already exists, the existing value takes precedence.
pub fn normalize_params(params: &serde_json::Value) -> serde_json::Value {
    let Some(obj) = params.as_object() else {
        return params.clone();
    };
    let mut result = obj.clone();
    for &(camel, snake) in CAMEL_TO_SNAKE {
        if !result.contains_key(snake) {
            if let Some(val) = result.remove(camel) {
                result.insert(snake.to_string(), val);
            }
        } else {
            // snake_case already present, drop the camelCase duplicate
            result.remove(camel);
        }
    }
    serde_json::Value::Object(result)
}

// ── Event wire format ────────────────────────────────────────────────────

/// Wire format for chat events pushed over WebSocket.
/// Envelope structure: `{ type, conversationId, timestamp, data }`.
#[derive(Debug, Serialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    pub timestamp: String,
    pub data: serde_json::Value,
}

pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Convert an internal ChatEvent to the client wire format. Event types
/// carry a `chat.` prefix on the wire.
pub fn chat_event_to_wire(event: &ChatEvent) -> WireEvent {
    let event_type = format!("chat.{}", event.event_type());
    let conversation_id = event.conversation_id().to_string();
    let timestamp = now_iso8601();

    let data = match event {
        ChatEvent::ConversationCreated {
            initiator_id,
            peer_id,
            item_id,
            item_kind,
            ..
        } => serde_json::json!({
            "initiatorId": initiator_id.to_string(),
            "peerId": peer_id.to_string(),
            "itemId": item_id.to_string(),
            "itemType": item_kind.to_string(),
        }),
        ChatEvent::MessageSent {
            message_id,
            sender_id,
            receiver_id,
            ..
        } => serde_json::json!({
            "messageId": message_id.to_string(),
            "senderId": sender_id.to_string(),
            "receiverId": receiver_id.to_string(),
        }),
        ChatEvent::ConversationResolved { .. } => serde_json::json!({}),
        ChatEvent::MessagesRead {
            reader_id, count, ..
        } => serde_json::json!({
            "readerId": reader_id.to_string(),
            "count": count,
        }),
    };

    WireEvent {
        event_type,
        conversation_id,
        timestamp,
        data,
    }
}

// ── Response transforms ──────────────────────────────────────────────────

/// Convert a MessageRow to client camelCase format.
pub fn message_to_wire(message: &MessageRow) -> serde_json::Value {
    serde_json::json!({
        "id": message.id.to_string(),
        "conversationId": message.conversation_id.to_string(),
        "senderId": message.sender_id.to_string(),
        "receiverId": message.receiver_id.to_string(),
        "content": message.content,
        "read": message.read,
        "timestamp": message.timestamp,
    })
}

/// Convert a ConversationRow to client camelCase format.
pub fn conversation_to_wire(conversation: &ConversationRow) -> serde_json::Value {
    serde_json::json!({
        "id": conversation.id.to_string(),
        "participants": [
            conversation.initiator_id.to_string(),
            conversation.peer_id.to_string(),
        ],
        "itemId": conversation.item_id.to_string(),
        "itemType": conversation.item_kind.to_string(),
        "isActive": conversation.is_open(),
        "lastMessage": conversation
            .last_message
            .as_ref()
            .map(message_to_wire)
            .unwrap_or(serde_json::Value::Null),
        "createdAt": conversation.created_at,
        "updatedAt": conversation.updated_at,
    })
}

/// Convert the bound user to client camelCase format.
pub fn user_to_wire(user: &AuthenticatedUser) -> serde_json::Value {
    serde_json::json!({
        "userId": user.id.to_string(),
        "name": user.name,
        "email": user.email,
    })
}

/// chat.send response.
pub fn send_response(outcome: &SendOutcome) -> serde_json::Value {
    serde_json::json!({
        "conversation": conversation_to_wire(&outcome.conversation),
        "message": message_to_wire(&outcome.message),
        "created": outcome.created,
    })
}

/// chat.conversations response.
pub fn conversation_list_response(
    conversations: &[ConversationRow],
    limit: u32,
) -> serde_json::Value {
    let items: Vec<serde_json::Value> = conversations.iter().map(conversation_to_wire).collect();
    let count = items.len();
    serde_json::json!({
        "conversations": items,
        "totalCount": count,
        "hasMore": count as u32 >= limit,
    })
}

/// chat.messages response.
pub fn message_list_response(messages: &[MessageRow], limit: u32) -> serde_json::Value {
    let items: Vec<serde_json::Value> = messages.iter().map(message_to_wire).collect();
    let count = items.len();
    serde_json::json!({
        "messages": items,
        "totalCount": count,
        "hasMore": count as u32 >= limit,
    })
}
