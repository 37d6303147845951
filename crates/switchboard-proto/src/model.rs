//! Conversation data model.
//!
//! These types mirror what the REST collaborator returns. A
//! [`ConversationSummary`] is one row of the inbox list, a [`Conversation`] is
//! the same row plus its ordered message sequence.
//!
//! # Invariants
//!
//! - [`MessageId`] is unique within one conversation. The model does not
//!   enforce this on decode; the store rejects duplicates at merge time.
//! - All timestamps are UTC (see [`crate::timestamp`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// Maximum number of characters kept for a list preview.
pub const PREVIEW_CHARS: usize = 120;

/// Stable conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Message identifier, unique within its conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Messaging channel a conversation arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Facebook Messenger.
    Facebook,
    /// Instagram direct messages.
    Instagram,
    /// WhatsApp.
    #[serde(alias = "whats_app")]
    Whatsapp,
    /// Telegram.
    Telegram,
    /// LINE.
    Line,
    /// Channel this client does not know about yet.
    #[serde(other)]
    Unknown,
}

impl Channel {
    /// Wire name, as used in list filters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
            Self::Line => "line",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "facebook" => Ok(Self::Facebook),
            "instagram" => Ok(Self::Instagram),
            "whatsapp" => Ok(Self::Whatsapp),
            "telegram" => Ok(Self::Telegram),
            "line" => Ok(Self::Line),
            other => Err(format!("unsupported channel: {other}")),
        }
    }
}

/// Workflow status of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Waiting on or being handled by an agent.
    #[default]
    Open,
    /// Parked, waiting on the participant.
    Pending,
    /// Resolved.
    Closed,
}

impl ConversationStatus {
    /// Wire name, as used in list filters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Closed => "closed",
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "pending" => Ok(Self::Pending),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unsupported status: {other}")),
        }
    }
}

/// Remote participant on the other end of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Channel-scoped participant id.
    pub id: String,
    /// Name shown in the inbox.
    #[serde(alias = "name")]
    pub display_name: String,
    /// Profile picture, if the channel exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Agent a conversation is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Agent user id.
    pub agent_id: String,
    /// Agent name, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    /// A human agent using the dashboard.
    Agent,
    /// The remote participant.
    #[serde(alias = "customer")]
    Participant,
}

/// Delivery state of an agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Submitted, not yet acknowledged by the channel.
    Pending,
    /// Accepted by the server or the channel.
    Confirmed,
    /// Rejected by the channel.
    Failed,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within the conversation.
    pub id: MessageId,
    /// Author role.
    #[serde(alias = "sender_role")]
    pub sender: SenderRole,
    /// Text content.
    #[serde(alias = "text")]
    pub content: String,
    /// Creation time, normalized to UTC.
    #[serde(alias = "created_at", deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    /// Delivery state. `None` for participant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
}

impl Message {
    /// List preview for this message, truncated on a character boundary.
    pub fn preview(&self) -> String {
        self.content.chars().take(PREVIEW_CHARS).collect()
    }
}

/// One row of the inbox list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Stable id.
    pub id: ConversationId,
    /// Channel the conversation lives on.
    pub channel: Channel,
    /// Remote participant.
    pub participant: Participant,
    /// Workflow status.
    #[serde(default)]
    pub status: ConversationStatus,
    /// Preview of the newest message.
    #[serde(default, alias = "last_message")]
    pub last_message_preview: Option<String>,
    /// Time of the newest message.
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Messages the agent has not seen yet.
    #[serde(default)]
    pub unread_count: u32,
    /// Owning agent. `None` if unassigned.
    #[serde(default, alias = "assigned_to")]
    pub assignee: Option<Assignment>,
}

impl ConversationSummary {
    /// Point the preview fields at `message`.
    pub fn record_last_message(&mut self, message: &Message) {
        self.last_message_preview = Some(message.preview());
        self.last_message_at = Some(message.timestamp);
    }
}

/// A conversation with its ordered message sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Summary fields.
    #[serde(flatten)]
    pub summary: ConversationSummary,
    /// Messages in chronological order.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Filters for the conversation list request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    /// Restrict to one channel.
    pub channel: Option<Channel>,
    /// Restrict to one workflow status.
    pub status: Option<ConversationStatus>,
}

impl ConversationFilter {
    /// Filter that matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Query parameters for the list request.
    pub fn query_pairs(&self) -> Vec<(&'static str, &'static str)> {
        let mut pairs = Vec::new();
        if let Some(channel) = self.channel {
            pairs.push(("channel", channel.as_str()));
        }
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn summary_decodes_with_defaults() {
        let summary: ConversationSummary = serde_json::from_value(json!({
            "id": "42",
            "channel": "instagram",
            "participant": { "id": "p1", "name": "Ana" },
        }))
        .unwrap();

        assert_eq!(summary.id, ConversationId::new("42"));
        assert_eq!(summary.channel, Channel::Instagram);
        assert_eq!(summary.participant.display_name, "Ana");
        assert_eq!(summary.status, ConversationStatus::Open);
        assert_eq!(summary.unread_count, 0);
        assert!(summary.last_message_at.is_none());
        assert!(summary.assignee.is_none());
    }

    #[test]
    fn unknown_channel_is_preserved_as_unknown() {
        let channel: Channel = serde_json::from_value(json!("tiktok")).unwrap();
        assert_eq!(channel, Channel::Unknown);
    }

    #[test]
    fn conversation_flattens_summary() {
        let conversation: Conversation = serde_json::from_value(json!({
            "id": "42",
            "channel": "whatsapp",
            "participant": { "id": "p1", "display_name": "Ana" },
            "last_message_at": 1_709_296_200_000_i64,
            "messages": [
                { "id": "m1", "sender": "customer", "content": "hi", "timestamp": "2024-03-01T12:30:00Z" },
                { "id": "m2", "sender": "agent", "text": "hello", "created_at": 1_709_296_260, "status": "confirmed" },
            ],
        }))
        .unwrap();

        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].sender, SenderRole::Participant);
        assert_eq!(conversation.messages[1].status, Some(DeliveryStatus::Confirmed));
        assert_eq!(
            conversation.summary.last_message_at.map(|t| t.timestamp()),
            Some(1_709_296_200)
        );
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let message = Message {
            id: MessageId::new("m1"),
            sender: SenderRole::Participant,
            content: "é".repeat(PREVIEW_CHARS + 10),
            timestamp: Utc::now(),
            status: None,
        };
        assert_eq!(message.preview().chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn filter_query_pairs() {
        let filter =
            ConversationFilter { channel: Some(Channel::Line), status: Some(ConversationStatus::Pending) };
        assert_eq!(filter.query_pairs(), vec![("channel", "line"), ("status", "pending")]);
        assert!(ConversationFilter::all().query_pairs().is_empty());
    }
}
