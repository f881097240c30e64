//! Message store: append, edit and delete rules plus keyset paging.

use std::collections::BTreeSet;

use atrium_common::{
    AppError, AppResult, ClockService, MessagingConfig, events::LastMessagePreview,
    events::MessagePayload,
};
use atrium_db::{
    entities::{conversation, message, message::MessageType, message_attachment},
    repositories::{
        MessageRepository, NewAttachment, NewMessage, PageCursor, SoftDeleted, UserRepository,
    },
};
use chrono::{DateTime, Duration, Utc};

use crate::services::views;

/// Input for appending a message.
#[derive(Debug, Clone)]
pub struct AppendMessageInput {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: Option<String>,
    pub reply_to_id: Option<i64>,
    pub client_id: Option<String>,
    /// Files already written to storage.
    pub attachments: Vec<NewAttachment>,
}

/// One page of messages, newest first.
#[derive(Debug, Clone)]
pub struct MessagePageRows {
    pub messages: Vec<message::Model>,
    pub next_before: Option<i64>,
}

/// Whether `now` is still within `minutes` of `created_at`.
#[must_use]
pub fn within_window(created_at: DateTime<Utc>, now: DateTime<Utc>, minutes: i64) -> bool {
    now - created_at <= Duration::minutes(minutes)
}

/// Type of a message inferred from its content.
#[must_use]
pub fn infer_message_type(has_body: bool, attachments: &[NewAttachment]) -> Option<MessageType> {
    if has_body {
        Some(MessageType::Text)
    } else if attachments.is_empty() {
        None
    } else if attachments.iter().all(|a| a.mime.starts_with("image/")) {
        Some(MessageType::Image)
    } else {
        Some(MessageType::File)
    }
}

/// Message store service.
#[derive(Clone)]
pub struct MessageService {
    message_repo: MessageRepository,
    user_repo: UserRepository,
    clock: ClockService,
    config: MessagingConfig,
}

impl MessageService {
    /// Create a new message service.
    #[must_use]
    pub const fn new(
        message_repo: MessageRepository,
        user_repo: UserRepository,
        clock: ClockService,
        config: MessagingConfig,
    ) -> Self {
        Self {
            message_repo,
            user_repo,
            clock,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &MessagingConfig {
        &self.config
    }

    /// Find a message that is not soft-deleted.
    pub async fn get_active(&self, id: i64) -> AppResult<message::Model> {
        self.message_repo.get_active(id).await
    }

    /// Find any message by id, tombstones included.
    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<message::Model>> {
        self.message_repo.find_by_id(id).await
    }

    /// Earlier send by the same sender carrying this client token.
    pub async fn find_by_client_id(
        &self,
        conversation_id: i64,
        sender_id: i64,
        client_id: &str,
    ) -> AppResult<Option<message::Model>> {
        self.message_repo
            .find_by_client_id(conversation_id, sender_id, client_id)
            .await
    }

    /// Append a message and its attachment rows.
    ///
    /// The conversation pointer and the sender's read cursor move in the same
    /// transaction.
    pub async fn append(
        &self,
        input: AppendMessageInput,
    ) -> AppResult<(message::Model, Vec<message_attachment::Model>)> {
        let body = input
            .body
            .filter(|b| !b.trim().is_empty());

        let message_type = infer_message_type(body.is_some(), &input.attachments).ok_or_else(
            || AppError::Validation("Text messages need a body or an attachment".to_string()),
        )?;

        if let Some(reply_to_id) = input.reply_to_id {
            let target = self.message_repo.find_by_id(reply_to_id).await?;
            let same_conversation = target
                .as_ref()
                .is_some_and(|t| t.conversation_id == input.conversation_id && !t.is_deleted());
            if !same_conversation {
                return Err(AppError::Validation(format!(
                    "Reply target {reply_to_id} is not a message of this conversation"
                )));
            }
        }

        let new_message = NewMessage {
            conversation_id: input.conversation_id,
            sender_id: input.sender_id,
            message_type,
            body,
            reply_to_id: input.reply_to_id,
            client_id: input.client_id,
            created_at: self.clock.now().into(),
        };

        self.message_repo.append(new_message, input.attachments).await
    }

    /// Replace the body of a message within the edit window.
    pub async fn edit(
        &self,
        message_id: i64,
        requester_id: i64,
        new_body: String,
    ) -> AppResult<message::Model> {
        let message = self.message_repo.get_active(message_id).await?;

        if message.sender_id != requester_id {
            return Err(AppError::Forbidden(
                "Only the sender can edit a message".to_string(),
            ));
        }
        if message.message_type == MessageType::System {
            return Err(AppError::Forbidden(
                "System messages cannot be edited".to_string(),
            ));
        }
        if message.message_type == MessageType::Text && new_body.trim().is_empty() {
            return Err(AppError::Validation("Message body cannot be empty".to_string()));
        }

        let now = self.clock.now();
        if !within_window(
            views::utc(message.created_at),
            now,
            self.config.edit_window_minutes,
        ) {
            return Err(AppError::EditWindowExpired(self.config.edit_window_minutes));
        }

        self.message_repo
            .update_body(message, new_body, now.into())
            .await
    }

    /// Tombstone a message for everyone within the delete window.
    pub async fn delete_for_everyone(
        &self,
        message_id: i64,
        requester_id: i64,
    ) -> AppResult<SoftDeleted> {
        let message = self.message_repo.get_active(message_id).await?;

        if message.sender_id != requester_id {
            return Err(AppError::Forbidden(
                "Only the sender can delete a message for everyone".to_string(),
            ));
        }

        let now = self.clock.now();
        if !within_window(
            views::utc(message.created_at),
            now,
            self.config.delete_window_minutes,
        ) {
            return Err(AppError::DeleteWindowExpired(
                self.config.delete_window_minutes,
            ));
        }

        self.message_repo.soft_delete(message.id, now.into()).await
    }

    /// Hide a message from the requester's own view.
    pub async fn hide_for(&self, message_id: i64, user_id: i64) -> AppResult<message::Model> {
        let message = self.message_repo.get_active(message_id).await?;
        self.message_repo
            .hide_for_user(message.id, user_id, self.clock.now().into())
            .await?;
        Ok(message)
    }

    /// Page through a conversation, newest first.
    ///
    /// `before` must be a message of the same conversation. `limit` is clamped to
    /// `1..=max_page_size` and defaults to the configured page size.
    pub async fn page(
        &self,
        conversation_id: i64,
        viewer_id: i64,
        before: Option<i64>,
        limit: Option<u64>,
    ) -> AppResult<MessagePageRows> {
        let limit = limit
            .unwrap_or(self.config.page_size)
            .clamp(1, self.config.max_page_size.max(1));

        let cursor = match before {
            Some(id) => {
                let anchor = self
                    .message_repo
                    .find_by_id(id)
                    .await?
                    .filter(|m| m.conversation_id == conversation_id)
                    .ok_or_else(|| {
                        AppError::InvalidCursor(format!(
                            "Message {id} is not part of conversation {conversation_id}"
                        ))
                    })?;
                Some(PageCursor {
                    created_at: anchor.created_at,
                    id: anchor.id,
                })
            }
            None => None,
        };

        let messages = self
            .message_repo
            .page(conversation_id, viewer_id, cursor, limit)
            .await?;

        let next_before = if messages.len() as u64 == limit {
            messages.last().map(|m| m.id)
        } else {
            None
        };

        Ok(MessagePageRows {
            messages,
            next_before,
        })
    }

    /// Load senders and attachments and build payloads, keeping order.
    pub async fn hydrate(&self, messages: &[message::Model]) -> AppResult<Vec<MessagePayload>> {
        if messages.is_empty() {
            return Ok(vec![]);
        }

        let sender_ids: Vec<i64> = messages
            .iter()
            .map(|m| m.sender_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let message_ids: Vec<i64> = messages.iter().map(|m| m.id).collect();

        let senders = self.user_repo.find_by_ids(&sender_ids).await?;
        let attachments = self.message_repo.find_attachments(&message_ids).await?;

        Ok(views::message_payloads(messages, &senders, &attachments))
    }

    /// Payload for a message whose attachments are already loaded.
    pub async fn hydrate_with(
        &self,
        message: &message::Model,
        attachments: &[message_attachment::Model],
    ) -> AppResult<MessagePayload> {
        let sender = self.user_repo.find_by_id(message.sender_id).await?;
        Ok(views::message_payload(message, sender.as_ref(), attachments))
    }

    /// Preview of the conversation's current last message.
    pub async fn last_message_preview(
        &self,
        conversation: &conversation::Model,
    ) -> AppResult<Option<LastMessagePreview>> {
        let Some(last_id) = conversation.last_message_id else {
            return Ok(None);
        };
        let Some(last) = self
            .message_repo
            .find_by_id(last_id)
            .await?
            .filter(|m| !m.is_deleted())
        else {
            return Ok(None);
        };
        let attachments = self.message_repo.find_attachments(&[last.id]).await?;
        Ok(Some(views::last_message_preview(
            &last,
            attachments.len(),
            self.config.preview_length,
        )))
    }

    /// Previews for many conversations at once, keyed by conversation id.
    pub async fn last_message_previews(
        &self,
        conversations: &[conversation::Model],
    ) -> AppResult<Vec<(i64, LastMessagePreview)>> {
        let last_ids: Vec<i64> = conversations
            .iter()
            .filter_map(|c| c.last_message_id)
            .collect();
        let messages = self.message_repo.find_by_ids(&last_ids).await?;
        let attachments = self.message_repo.find_attachments(&last_ids).await?;

        Ok(messages
            .iter()
            .filter(|m| !m.is_deleted())
            .map(|m| {
                let count = attachments.iter().filter(|a| a.message_id == m.id).count();
                (
                    m.conversation_id,
                    views::last_message_preview(m, count, self.config.preview_length),
                )
            })
            .collect())
    }

    /// Unread messages for a participant.
    pub async fn count_unread(
        &self,
        conversation_id: i64,
        user_id: i64,
        last_read_message_id: Option<i64>,
    ) -> AppResult<u64> {
        self.message_repo
            .count_unread(conversation_id, user_id, last_read_message_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attachment(mime: &str) -> NewAttachment {
        NewAttachment {
            disk: "local".to_string(),
            path: "x".to_string(),
            mime: mime.to_string(),
            size: 1,
            width: None,
            height: None,
            original_name: None,
            metadata: None,
        }
    }

    #[test]
    fn test_within_window_boundaries() {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        assert!(within_window(created, created + Duration::minutes(5), 15));
        assert!(within_window(created, created + Duration::minutes(15), 15));
        assert!(!within_window(created, created + Duration::minutes(20), 15));
    }

    #[test]
    fn test_infer_message_type() {
        assert_eq!(infer_message_type(true, &[]), Some(MessageType::Text));
        assert_eq!(infer_message_type(false, &[]), None);
        assert_eq!(
            infer_message_type(false, &[attachment("image/png"), attachment("image/jpeg")]),
            Some(MessageType::Image)
        );
        assert_eq!(
            infer_message_type(false, &[attachment("image/png"), attachment("application/pdf")]),
            Some(MessageType::File)
        );
        assert_eq!(
            infer_message_type(true, &[attachment("image/png")]),
            Some(MessageType::Text)
        );
    }
}
