//! Realtime event protocol shared by the server and clients.
//!
//! Every event travels inside an [`Envelope`] naming the [`Channel`] it was
//! published on. Conversation channels carry thread events; user channels carry
//! list deltas meant for a single recipient.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publish/subscribe target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Channel {
    /// Everyone viewing a conversation.
    Conversation(i64),
    /// One user's private channel.
    User(i64),
}

impl Channel {
    /// Stable channel name, e.g. `conversation.12` or `user.3`.
    #[must_use]
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Parse a name produced by [`Channel::name`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let (scope, id) = name.split_once('.')?;
        let id = id.parse().ok()?;
        match scope {
            "conversation" => Some(Self::Conversation(id)),
            "user" => Some(Self::User(id)),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation.{id}"),
            Self::User(id) => write!(f, "user.{id}"),
        }
    }
}

/// Which audience a deletion applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    /// Tombstone the message for every participant.
    #[default]
    All,
    /// Hide the message from the requester only.
    Me,
}

/// Public profile of a message sender or participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Attachment as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub id: i64,
    pub message_id: i64,
    pub mime: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub original_name: Option<String>,
    /// Authenticated endpoint serving the bytes inline.
    pub url: String,
    /// Authenticated endpoint serving the thumbnail, when one was generated.
    pub thumbnail_url: Option<String>,
}

/// A fully hydrated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub sender: Option<UserSummary>,
    pub message_type: String,
    pub body: Option<String>,
    pub reply_to_id: Option<i64>,
    /// Opaque token chosen by the sending client for optimistic rendering.
    pub client_id: Option<String>,
    pub attachments: Vec<AttachmentPayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEditedPayload {
    pub conversation_id: i64,
    pub message_id: i64,
    pub body: Option<String>,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeletedPayload {
    pub conversation_id: i64,
    pub message_id: i64,
    pub scope: DeleteScope,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadAdvancedPayload {
    pub conversation_id: i64,
    pub user_id: i64,
    pub last_read_message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub conversation_id: i64,
    pub user_id: i64,
    pub is_typing: bool,
}

/// Short description of the newest visible message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessagePreview {
    pub id: i64,
    pub sender_id: i64,
    pub message_type: String,
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

/// What caused a [`ConversationListDelta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaCause {
    MessageSent,
    MessageEdited,
    MessageDeleted,
    /// The recipient was added to the conversation.
    Joined,
}

impl DeltaCause {
    /// How much the recipient's unread counter moves.
    #[must_use]
    pub const fn unread_delta(self) -> i32 {
        match self {
            Self::MessageSent => 1,
            Self::MessageEdited | Self::MessageDeleted | Self::Joined => 0,
        }
    }
}

/// Summary-level change of one conversation for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationListDelta {
    pub conversation_id: i64,
    pub kind: String,
    /// Only set for group conversations.
    pub title: Option<String>,
    /// Only set for group conversations.
    pub icon_path: Option<String>,
    pub last_message: Option<LastMessagePreview>,
    pub unread_delta: i32,
    pub cause: DeltaCause,
    /// Message the cause refers to, if any.
    pub message_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub user: UserSummary,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

/// Full conversation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: i64,
    pub kind: String,
    pub title: Option<String>,
    pub icon_path: Option<String>,
    pub creator_id: i64,
    pub last_message_id: Option<i64>,
    pub participants: Vec<ParticipantSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Participant as listed in a conversation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub user: UserSummary,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub last_read_message_id: Option<i64>,
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub kind: String,
    pub title: Option<String>,
    pub icon_path: Option<String>,
    pub creator_id: i64,
    pub participants: Vec<ParticipantView>,
    pub last_message: Option<LastMessagePreview>,
    pub unread_count: u64,
    pub last_read_message_id: Option<i64>,
    pub pinned: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newest-first slice of a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<MessagePayload>,
    /// Pass as `before` to fetch the next older page. `None` when exhausted.
    pub next_before: Option<i64>,
}

/// Every event the server publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RealtimeEvent {
    MessageSent(MessagePayload),
    MessageEdited(MessageEditedPayload),
    MessageDeleted(MessageDeletedPayload),
    ReadAdvanced(ReadAdvancedPayload),
    TypingChanged(TypingPayload),
    ConversationListDelta(ConversationListDelta),
    ConversationUpdated(ConversationSnapshot),
}

impl RealtimeEvent {
    /// Wire name of the event, also used as the SSE event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MessageSent(_) => "message_sent",
            Self::MessageEdited(_) => "message_edited",
            Self::MessageDeleted(_) => "message_deleted",
            Self::ReadAdvanced(_) => "read_advanced",
            Self::TypingChanged(_) => "typing_changed",
            Self::ConversationListDelta(_) => "conversation_list_delta",
            Self::ConversationUpdated(_) => "conversation_updated",
        }
    }

    /// Conversation the event concerns.
    #[must_use]
    pub const fn conversation_id(&self) -> i64 {
        match self {
            Self::MessageSent(p) => p.conversation_id,
            Self::MessageEdited(p) => p.conversation_id,
            Self::MessageDeleted(p) => p.conversation_id,
            Self::ReadAdvanced(p) => p.conversation_id,
            Self::TypingChanged(p) => p.conversation_id,
            Self::ConversationListDelta(p) => p.conversation_id,
            Self::ConversationUpdated(p) => p.id,
        }
    }
}

/// An event together with the channel it was published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: Channel,
    pub event: RealtimeEvent,
}

impl Envelope {
    #[must_use]
    pub const fn new(channel: Channel, event: RealtimeEvent) -> Self {
        Self { channel, event }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Conversation(12).name(), "conversation.12");
        assert_eq!(Channel::User(3).name(), "user.3");
        assert_eq!(Channel::parse("user.3"), Some(Channel::User(3)));
        assert_eq!(Channel::parse("room.3"), None);
        assert_eq!(Channel::parse("conversation.x"), None);
    }

    #[test]
    fn test_event_wire_format() {
        let envelope = Envelope::new(
            Channel::Conversation(7),
            RealtimeEvent::TypingChanged(TypingPayload {
                conversation_id: 7,
                user_id: 2,
                is_typing: true,
            }),
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["channel"]["scope"], "conversation");
        assert_eq!(json["channel"]["id"], 7);
        assert_eq!(json["event"]["type"], "typing_changed");
        assert_eq!(json["event"]["payload"]["is_typing"], true);

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_unread_delta_per_cause() {
        assert_eq!(DeltaCause::MessageSent.unread_delta(), 1);
        assert_eq!(DeltaCause::MessageEdited.unread_delta(), 0);
        assert_eq!(DeltaCause::MessageDeleted.unread_delta(), 0);
        assert_eq!(DeltaCause::Joined.unread_delta(), 0);
    }
}
