//! Live stream events.
//!
//! Every server frame is a JSON envelope:
//!
//! ```text
//! { "type": "<kind>", "data": { ... } }
//! ```
//!
//! The envelope kind selects a variant of the closed [`PushEvent`] enum. Kinds
//! this client does not recognize decode to [`PushEvent::Unknown`] rather than
//! failing, so a newer server never breaks an older client. A recognized kind
//! whose `data` body does not match its shape is a
//! [`ProtocolError::InvalidPayload`].
//!
//! Client frames ([`ClientFrame`]) use the same envelope without a body.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    errors::{ProtocolError, Result},
    model::{Assignment, ConversationId, DeliveryStatus, Message, MessageId},
};

/// Recognized push event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A message was added to a conversation.
    MessageCreated,
    /// The delivery status of an agent message changed.
    MessageStatus,
    /// A conversation was (re)assigned.
    ConversationAssigned,
    /// A conversation was read on another session.
    ConversationRead,
    /// Keepalive reply.
    Pong,
}

impl EventKind {
    /// Look up a wire kind. `None` for kinds this client does not handle.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "message.created" | "new_message" => Some(Self::MessageCreated),
            "message.status" => Some(Self::MessageStatus),
            "conversation.assigned" => Some(Self::ConversationAssigned),
            "conversation.read" => Some(Self::ConversationRead),
            "pong" => Some(Self::Pong),
            _ => None,
        }
    }

    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageCreated => "message.created",
            Self::MessageStatus => "message.status",
            Self::ConversationAssigned => "conversation.assigned",
            Self::ConversationRead => "conversation.read",
            Self::Pong => "pong",
        }
    }
}

/// Body of a `message.created` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreated {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// The new message.
    pub message: Message,
}

/// Body of a `message.status` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatus {
    /// Conversation holding the message.
    pub conversation_id: ConversationId,
    /// Message whose status changed.
    pub message_id: MessageId,
    /// New delivery status.
    pub status: DeliveryStatus,
}

/// Body of a `conversation.assigned` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAssigned {
    /// Reassigned conversation.
    pub conversation_id: ConversationId,
    /// New owner. `None` when the conversation was unassigned.
    #[serde(default)]
    pub assignee: Option<Assignment>,
}

/// Body of a `conversation.read` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRead {
    /// Conversation marked as read.
    pub conversation_id: ConversationId,
}

/// A decoded server push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// `message.created`
    MessageCreated(MessageCreated),
    /// `message.status`
    MessageStatus(MessageStatus),
    /// `conversation.assigned`
    ConversationAssigned(ConversationAssigned),
    /// `conversation.read`
    ConversationRead(ConversationRead),
    /// `pong`
    Pong,
    /// Any kind this client does not recognize.
    Unknown {
        /// Wire kind as received
        kind: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushEvent {
    /// Decode a text frame received on the live stream.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Malformed` if the frame is not a JSON object with a
    ///   string `type` field
    /// - `ProtocolError::InvalidPayload` if the kind is recognized but `data`
    ///   does not match it
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let Some(kind) = EventKind::parse(&envelope.kind) else {
            return Ok(Self::Unknown { kind: envelope.kind });
        };

        Ok(match kind {
            EventKind::MessageCreated => Self::MessageCreated(body(kind, envelope.data)?),
            EventKind::MessageStatus => Self::MessageStatus(body(kind, envelope.data)?),
            EventKind::ConversationAssigned => {
                Self::ConversationAssigned(body(kind, envelope.data)?)
            },
            EventKind::ConversationRead => Self::ConversationRead(body(kind, envelope.data)?),
            EventKind::Pong => Self::Pong,
        })
    }

    /// Wire kind of this event.
    pub fn kind(&self) -> &str {
        match self {
            Self::MessageCreated(_) => EventKind::MessageCreated.as_str(),
            Self::MessageStatus(_) => EventKind::MessageStatus.as_str(),
            Self::ConversationAssigned(_) => EventKind::ConversationAssigned.as_str(),
            Self::ConversationRead(_) => EventKind::ConversationRead.as_str(),
            Self::Pong => EventKind::Pong.as_str(),
            Self::Unknown { kind } => kind,
        }
    }

    /// Conversation this event targets, if any.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::MessageCreated(e) => Some(&e.conversation_id),
            Self::MessageStatus(e) => Some(&e.conversation_id),
            Self::ConversationAssigned(e) => Some(&e.conversation_id),
            Self::ConversationRead(e) => Some(&e.conversation_id),
            Self::Pong | Self::Unknown { .. } => None,
        }
    }
}

fn body<T: DeserializeOwned>(kind: EventKind, data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| ProtocolError::InvalidPayload { kind: kind.as_str(), reason: e.to_string() })
}

/// Frames sent from the client to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Keepalive. Carries no payload.
    Ping,
}

impl ClientFrame {
    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if serialization fails
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SenderRole;

    #[test]
    fn decodes_message_created() {
        let frame = r#"{
            "type": "message.created",
            "data": {
                "conversation_id": "42",
                "message": { "id": "m1", "sender": "participant", "content": "hi", "timestamp": 1709296200 }
            }
        }"#;

        let PushEvent::MessageCreated(event) = PushEvent::decode(frame).unwrap() else {
            panic!("expected message.created");
        };
        assert_eq!(event.conversation_id.as_str(), "42");
        assert_eq!(event.message.id.as_str(), "m1");
        assert_eq!(event.message.sender, SenderRole::Participant);
    }

    #[test]
    fn legacy_new_message_alias() {
        let frame = r#"{"type":"new_message","data":{"conversation_id":"7","message":{"id":"m9","sender":"agent","content":"ok","timestamp":"2024-03-01 12:30:00"}}}"#;
        let event = PushEvent::decode(frame).unwrap();
        assert_eq!(event.kind(), "message.created");
        assert_eq!(event.conversation_id().map(ConversationId::as_str), Some("7"));
    }

    #[test]
    fn unknown_kind_is_not_an_error() {
        let event = PushEvent::decode(r#"{"type":"typing.started","data":{"x":1}}"#).unwrap();
        assert_eq!(event, PushEvent::Unknown { kind: "typing.started".into() });
        assert!(event.conversation_id().is_none());
    }

    #[test]
    fn pong_needs_no_body() {
        assert_eq!(PushEvent::decode(r#"{"type":"pong"}"#).unwrap(), PushEvent::Pong);
    }

    #[test]
    fn missing_type_is_malformed() {
        assert!(matches!(
            PushEvent::decode(r#"{"data":{}}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(PushEvent::decode("not json"), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn bad_body_for_known_kind() {
        let err = PushEvent::decode(r#"{"type":"message.status","data":{"conversation_id":"1"}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { kind: "message.status", .. }));
    }

    #[test]
    fn bad_timestamp_invalidates_message() {
        let frame = r#"{"type":"message.created","data":{"conversation_id":"1","message":{"id":"m1","sender":"agent","content":"x","timestamp":"soon"}}}"#;
        assert!(matches!(
            PushEvent::decode(frame),
            Err(ProtocolError::InvalidPayload { kind: "message.created", .. })
        ));
    }

    #[test]
    fn ping_encoding() {
        insta::assert_snapshot!(ClientFrame::Ping.encode().unwrap(), @r#"{"type":"ping"}"#);
    }
}
