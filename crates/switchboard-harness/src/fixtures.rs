//! Builders for conversations, messages, and push frames.
//!
//! Timestamps are offsets in seconds from a fixed epoch so tests can reason
//! about ordering without wall-clock time.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use switchboard_proto::{
    Assignment, Channel, Conversation, ConversationId, ConversationStatus, ConversationSummary,
    DeliveryStatus, Message, MessageId, Participant, SenderRole,
};

/// Fixed base for fixture timestamps (2023-11-14T22:13:20Z).
pub const BASE_EPOCH_SECS: i64 = 1_700_000_000;

/// Fixture time `secs` after [`BASE_EPOCH_SECS`].
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_EPOCH_SECS + secs, 0).single().unwrap_or_default()
}

/// Conversation id shorthand.
pub fn cid(id: &str) -> ConversationId {
    ConversationId::new(id)
}

/// Message id shorthand.
pub fn mid(id: &str) -> MessageId {
    MessageId::new(id)
}

/// Open Telegram conversation with no messages.
pub fn summary(id: &str) -> ConversationSummary {
    ConversationSummary {
        id: cid(id),
        channel: Channel::Telegram,
        participant: Participant {
            id: format!("participant-{id}"),
            display_name: format!("Participant {id}"),
            avatar_url: None,
        },
        status: ConversationStatus::Open,
        last_message_preview: None,
        last_message_at: None,
        unread_count: 0,
        assignee: None,
    }
}

/// Message with content derived from its id.
pub fn message(id: &str, sender: SenderRole, secs: i64) -> Message {
    Message {
        id: mid(id),
        sender,
        content: format!("text of {id}"),
        timestamp: at(secs),
        status: (sender == SenderRole::Agent).then_some(DeliveryStatus::Confirmed),
    }
}

/// Conversation holding `messages`, with the summary preview pointing at the
/// newest one.
pub fn conversation(id: &str, messages: &[Message]) -> Conversation {
    let mut summary = summary(id);
    if let Some(newest) = messages.iter().max_by_key(|m| m.timestamp) {
        summary.record_last_message(newest);
    }
    Conversation { summary, messages: messages.to_vec() }
}

/// `message.created` push frame.
pub fn message_created(conversation_id: &str, message: &Message) -> String {
    json!({
        "type": "message.created",
        "data": { "conversation_id": conversation_id, "message": message },
    })
    .to_string()
}

/// `message.status` push frame.
pub fn message_status(conversation_id: &str, message_id: &str, status: DeliveryStatus) -> String {
    json!({
        "type": "message.status",
        "data": { "conversation_id": conversation_id, "message_id": message_id, "status": status },
    })
    .to_string()
}

/// `conversation.assigned` push frame.
pub fn conversation_assigned(conversation_id: &str, assignee: Option<&Assignment>) -> String {
    json!({
        "type": "conversation.assigned",
        "data": { "conversation_id": conversation_id, "assignee": assignee },
    })
    .to_string()
}

/// `conversation.read` push frame.
pub fn conversation_read(conversation_id: &str) -> String {
    json!({ "type": "conversation.read", "data": { "conversation_id": conversation_id } })
        .to_string()
}
