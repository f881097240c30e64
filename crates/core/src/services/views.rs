//! Builders turning hydrated entities into wire payloads.
//!
//! Everything here is a pure function of already-loaded rows; callers fetch
//! senders, attachments and participants up front.

use std::collections::HashMap;

use atrium_common::events::{
    AttachmentPayload, ConversationListDelta, ConversationSnapshot, DeltaCause,
    LastMessagePreview, MessagePayload, ParticipantSnapshot, ParticipantView, UserSummary,
};
use atrium_db::entities::{
    conversation, conversation::ConversationType, conversation_participant, message,
    message::MessageType, message_attachment, user,
};
use chrono::{DateTime, Utc};

/// Path prefix of the attachment endpoints.
pub const ATTACHMENT_ROUTE: &str = "/api/attachments";

#[must_use]
pub fn user_summary(user: &user::Model) -> UserSummary {
    UserSummary {
        id: user.id,
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        avatar_url: user.avatar_url.clone(),
    }
}

#[must_use]
pub fn attachment_payload(attachment: &message_attachment::Model) -> AttachmentPayload {
    AttachmentPayload {
        id: attachment.id,
        message_id: attachment.message_id,
        mime: attachment.mime.clone(),
        size: attachment.size,
        width: attachment.width,
        height: attachment.height,
        original_name: attachment.original_name.clone(),
        url: format!("{ATTACHMENT_ROUTE}/{}", attachment.id),
        thumbnail_url: attachment
            .thumbnail_path()
            .map(|_| format!("{ATTACHMENT_ROUTE}/{}/thumbnail", attachment.id)),
    }
}

#[must_use]
pub fn message_payload(
    message: &message::Model,
    sender: Option<&user::Model>,
    attachments: &[message_attachment::Model],
) -> MessagePayload {
    MessagePayload {
        id: message.id,
        conversation_id: message.conversation_id,
        sender_id: message.sender_id,
        sender: sender.map(user_summary),
        message_type: message.message_type.as_str().to_string(),
        body: message.body.clone(),
        reply_to_id: message.reply_to_id,
        client_id: message.client_id.clone(),
        attachments: attachments.iter().map(attachment_payload).collect(),
        created_at: utc(message.created_at),
        updated_at: utc(message.updated_at),
        edited_at: message.edited_at.map(utc),
    }
}

/// Build payloads for a batch of messages, keeping the input order.
#[must_use]
pub fn message_payloads(
    messages: &[message::Model],
    senders: &[user::Model],
    attachments: &[message_attachment::Model],
) -> Vec<MessagePayload> {
    let senders: HashMap<i64, &user::Model> = senders.iter().map(|u| (u.id, u)).collect();
    let mut by_message: HashMap<i64, Vec<message_attachment::Model>> = HashMap::new();
    for attachment in attachments {
        by_message
            .entry(attachment.message_id)
            .or_default()
            .push(attachment.clone());
    }

    messages
        .iter()
        .map(|m| {
            message_payload(
                m,
                senders.get(&m.sender_id).copied(),
                by_message.get(&m.id).map_or(&[][..], Vec::as_slice),
            )
        })
        .collect()
}

/// Conversation list preview of a message.
///
/// Text is cut to `max_chars` characters with a `...` suffix. Messages without
/// text but with attachments show a paperclip and the count. Anything else
/// shows its type label.
#[must_use]
pub fn preview_text(message: &message::Model, attachment_count: usize, max_chars: usize) -> String {
    if message.message_type == MessageType::Text || message.message_type == MessageType::System {
        if let Some(body) = message.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            return truncate(body, max_chars);
        }
    }

    match attachment_count {
        0 => message.message_type.label().to_string(),
        1 => "📎 Attachment".to_string(),
        n => format!("📎 {n} attachments"),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

#[must_use]
pub fn last_message_preview(
    message: &message::Model,
    attachment_count: usize,
    max_chars: usize,
) -> LastMessagePreview {
    LastMessagePreview {
        id: message.id,
        sender_id: message.sender_id,
        message_type: message.message_type.as_str().to_string(),
        preview: preview_text(message, attachment_count, max_chars),
        created_at: utc(message.created_at),
    }
}

/// Delta for one recipient's conversation list. Title and icon are only sent for groups.
#[must_use]
pub fn list_delta(
    conversation: &conversation::Model,
    last_message: Option<LastMessagePreview>,
    cause: DeltaCause,
    message_id: Option<i64>,
) -> ConversationListDelta {
    let is_group = conversation.kind == ConversationType::Group;
    ConversationListDelta {
        conversation_id: conversation.id,
        kind: conversation.kind.as_str().to_string(),
        title: conversation.title.clone().filter(|_| is_group),
        icon_path: conversation.icon_path.clone().filter(|_| is_group),
        last_message,
        unread_delta: cause.unread_delta(),
        cause,
        message_id,
        updated_at: utc(conversation.updated_at),
    }
}

#[must_use]
pub fn participant_view(
    participant: &conversation_participant::Model,
    user: &user::Model,
) -> ParticipantView {
    ParticipantView {
        user: user_summary(user),
        role: participant.role.as_str().to_string(),
        joined_at: utc(participant.joined_at),
        last_read_message_id: participant.last_read_message_id,
    }
}

#[must_use]
pub fn conversation_snapshot(
    conversation: &conversation::Model,
    participants: &[(conversation_participant::Model, user::Model)],
) -> ConversationSnapshot {
    ConversationSnapshot {
        id: conversation.id,
        kind: conversation.kind.as_str().to_string(),
        title: conversation.title.clone(),
        icon_path: conversation.icon_path.clone(),
        creator_id: conversation.creator_id,
        last_message_id: conversation.last_message_id,
        participants: participants
            .iter()
            .map(|(p, u)| ParticipantSnapshot {
                user: user_summary(u),
                role: p.role.as_str().to_string(),
                joined_at: utc(p.joined_at),
            })
            .collect(),
        created_at: utc(conversation.created_at),
        updated_at: utc(conversation.updated_at),
    }
}

pub(crate) fn utc(at: sea_orm::prelude::DateTimeWithTimeZone) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}
