//! Messaging service.
//!
//! Orchestrates a user action end to end: authorize, commit through the
//! stores, then broadcast. Broadcasting happens strictly after the commit and
//! its failures never reach the caller.

use atrium_common::{
    AppError, AppResult, ClockService, DeleteScope, MessagePage, MessagePayload, RealtimeEvent,
    events::{
        DeltaCause, LastMessagePreview, MessageDeletedPayload, MessageEditedPayload,
        ReadAdvancedPayload, TypingPayload,
    },
};
use atrium_db::{
    entities::{conversation, message},
    repositories::ConversationRepository,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::services::{
    access::{Denial, require_participant},
    attachment::{AttachmentService, UploadedAttachment},
    broadcaster::EventBroadcaster,
    event_publisher::EventPublisherService,
    message::{AppendMessageInput, MessageService},
    views,
};

/// Maximum length of a message body, in characters.
pub const MAX_BODY_CHARS: usize = 10_000;

/// Input for sending a message.
#[derive(Debug, Clone, Default)]
pub struct SendMessageInput {
    pub conversation_id: i64,
    pub body: Option<String>,
    pub reply_to_id: Option<i64>,
    /// Client-generated token; a repeated send with the same token returns the first message.
    pub client_id: Option<String>,
    pub files: Vec<UploadedAttachment>,
}

/// Read state of a participant after a mark-read call.
#[derive(Debug, Clone, Serialize)]
pub struct ReadState {
    pub conversation_id: i64,
    pub last_read_message_id: Option<i64>,
    /// False when the requested position was not ahead of the stored cursor.
    pub advanced: bool,
    pub unread_count: u64,
}

/// Messaging service.
#[derive(Clone)]
pub struct MessagingService {
    conversation_repo: ConversationRepository,
    message_service: MessageService,
    attachment_service: AttachmentService,
    broadcaster: EventBroadcaster,
    clock: ClockService,
}

impl MessagingService {
    /// Create a new messaging service.
    #[must_use]
    pub fn new(
        conversation_repo: ConversationRepository,
        message_service: MessageService,
        attachment_service: AttachmentService,
        clock: ClockService,
    ) -> Self {
        Self {
            conversation_repo,
            message_service,
            attachment_service,
            broadcaster: EventBroadcaster::default(),
            clock,
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, publisher: EventPublisherService) {
        self.broadcaster = EventBroadcaster::new(publisher);
    }

    /// Send a message with optional attachments.
    pub async fn send(&self, sender_id: i64, input: SendMessageInput) -> AppResult<MessagePayload> {
        let conversation_id = input.conversation_id;
        self.conversation_repo.get_by_id(conversation_id).await?;
        require_participant(
            &self.conversation_repo,
            conversation_id,
            sender_id,
            Denial::Forbidden,
        )
        .await?;

        if let Some(client_id) = input.client_id.as_deref() {
            if let Some(existing) = self
                .message_service
                .find_by_client_id(conversation_id, sender_id, client_id)
                .await?
            {
                debug!(message_id = existing.id, client_id, "Returning previously sent message");
                return self.hydrate_one(&existing).await;
            }
        }

        let body = input.body.filter(|b| !b.trim().is_empty());
        if body.is_none() && input.files.is_empty() {
            return Err(AppError::Validation(
                "A message needs a body or an attachment".to_string(),
            ));
        }
        if body.as_ref().is_some_and(|b| b.chars().count() > MAX_BODY_CHARS) {
            return Err(AppError::Validation(format!(
                "Message body exceeds {MAX_BODY_CHARS} characters"
            )));
        }

        let stored = self.attachment_service.store_all(input.files).await?;

        let appended = self
            .message_service
            .append(AppendMessageInput {
                conversation_id,
                sender_id,
                body,
                reply_to_id: input.reply_to_id,
                client_id: input.client_id.clone(),
                attachments: stored.clone(),
            })
            .await;

        let (message, attachments) = match appended {
            Ok(appended) => appended,
            Err(e) => {
                self.attachment_service.discard(&stored).await;
                if let (AppError::Conflict(_), Some(client_id)) = (&e, input.client_id.as_deref()) {
                    if let Some(existing) = self
                        .message_service
                        .find_by_client_id(conversation_id, sender_id, client_id)
                        .await?
                    {
                        return self.hydrate_one(&existing).await;
                    }
                }
                return Err(e);
            }
        };

        info!(
            message_id = message.id,
            conversation_id,
            sender_id,
            attachments = attachments.len(),
            "Message sent"
        );

        let payload = self.message_service.hydrate_with(&message, &attachments).await?;

        self.broadcaster
            .to_conversation(conversation_id, RealtimeEvent::MessageSent(payload.clone()))
            .await;

        let preview = views::last_message_preview(
            &message,
            attachments.len(),
            self.message_service.config().preview_length,
        );
        self.fan_out_delta(
            conversation_id,
            sender_id,
            Some(preview),
            DeltaCause::MessageSent,
            message.id,
        )
        .await;

        Ok(payload)
    }

    /// Edit the body of one's own message.
    pub async fn edit(
        &self,
        user_id: i64,
        message_id: i64,
        body: String,
    ) -> AppResult<MessagePayload> {
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(AppError::Validation(format!(
                "Message body exceeds {MAX_BODY_CHARS} characters"
            )));
        }

        let target = self.message_service.get_active(message_id).await?;
        require_participant(
            &self.conversation_repo,
            target.conversation_id,
            user_id,
            Denial::Forbidden,
        )
        .await?;

        let edited = self.message_service.edit(message_id, user_id, body).await?;
        let payload = self.hydrate_one(&edited).await?;

        if let Some(edited_at) = payload.edited_at {
            self.broadcaster
                .to_conversation(
                    edited.conversation_id,
                    RealtimeEvent::MessageEdited(MessageEditedPayload {
                        conversation_id: edited.conversation_id,
                        message_id: edited.id,
                        body: edited.body.clone(),
                        edited_at,
                    }),
                )
                .await;
        }

        let preview = self.current_preview(edited.conversation_id).await;
        self.fan_out_delta(
            edited.conversation_id,
            user_id,
            preview,
            DeltaCause::MessageEdited,
            edited.id,
        )
        .await;

        Ok(payload)
    }

    /// Delete a message for everyone or hide it for the requester only.
    pub async fn delete(&self, user_id: i64, message_id: i64, scope: DeleteScope) -> AppResult<()> {
        let target = self.message_service.get_active(message_id).await?;
        require_participant(
            &self.conversation_repo,
            target.conversation_id,
            user_id,
            Denial::Forbidden,
        )
        .await?;

        match scope {
            DeleteScope::Me => {
                self.message_service.hide_for(message_id, user_id).await?;
                debug!(message_id, user_id, "Message hidden");
                Ok(())
            }
            DeleteScope::All => {
                let deleted = self
                    .message_service
                    .delete_for_everyone(message_id, user_id)
                    .await?;
                let conversation_id = deleted.message.conversation_id;

                info!(
                    message_id,
                    conversation_id,
                    pointer_moved = deleted.pointer_moved,
                    "Message deleted for everyone"
                );

                let deleted_at = deleted
                    .message
                    .deleted_at
                    .map_or_else(|| self.clock.now(), views::utc);
                self.broadcaster
                    .to_conversation(
                        conversation_id,
                        RealtimeEvent::MessageDeleted(MessageDeletedPayload {
                            conversation_id,
                            message_id,
                            scope: DeleteScope::All,
                            deleted_at,
                        }),
                    )
                    .await;

                let preview = self.preview_of(&deleted.conversation).await;
                self.fan_out_delta(
                    conversation_id,
                    user_id,
                    preview,
                    DeltaCause::MessageDeleted,
                    message_id,
                )
                .await;
                Ok(())
            }
        }
    }

    /// Move the caller's read cursor forward to `message_id`.
    ///
    /// A cursor pointing elsewhere is rejected. An older or equal position is
    /// accepted without effect and without an event.
    pub async fn mark_read(
        &self,
        conversation_id: i64,
        user_id: i64,
        message_id: i64,
    ) -> AppResult<ReadState> {
        let participant = require_participant(
            &self.conversation_repo,
            conversation_id,
            user_id,
            Denial::Forbidden,
        )
        .await?;

        let target = self.message_service.find_by_id(message_id).await?;
        if !target.is_some_and(|m| m.conversation_id == conversation_id) {
            return Err(AppError::InvalidCursor(format!(
                "Message {message_id} is not part of conversation {conversation_id}"
            )));
        }

        let advanced = self
            .conversation_repo
            .advance_read_cursor(conversation_id, user_id, message_id, self.clock.now().into())
            .await?;

        let last_read_message_id = if advanced {
            Some(message_id)
        } else {
            participant.last_read_message_id
        };

        if advanced {
            self.broadcaster
                .to_conversation(
                    conversation_id,
                    RealtimeEvent::ReadAdvanced(ReadAdvancedPayload {
                        conversation_id,
                        user_id,
                        last_read_message_id: message_id,
                    }),
                )
                .await;
        }

        let unread_count = self
            .message_service
            .count_unread(conversation_id, user_id, last_read_message_id)
            .await?;

        Ok(ReadState {
            conversation_id,
            last_read_message_id,
            advanced,
            unread_count,
        })
    }

    /// Relay a typing signal. Nothing is stored.
    pub async fn set_typing(
        &self,
        conversation_id: i64,
        user_id: i64,
        is_typing: bool,
    ) -> AppResult<()> {
        require_participant(
            &self.conversation_repo,
            conversation_id,
            user_id,
            Denial::Forbidden,
        )
        .await?;

        self.broadcaster
            .to_conversation(
                conversation_id,
                RealtimeEvent::TypingChanged(TypingPayload {
                    conversation_id,
                    user_id,
                    is_typing,
                }),
            )
            .await;
        Ok(())
    }

    /// One page of a conversation's history, newest first.
    pub async fn list_messages(
        &self,
        conversation_id: i64,
        viewer_id: i64,
        before: Option<i64>,
        limit: Option<u64>,
    ) -> AppResult<MessagePage> {
        require_participant(
            &self.conversation_repo,
            conversation_id,
            viewer_id,
            Denial::NotFound,
        )
        .await?;

        let page = self
            .message_service
            .page(conversation_id, viewer_id, before, limit)
            .await?;
        let messages = self.message_service.hydrate(&page.messages).await?;

        Ok(MessagePage {
            messages,
            next_before: page.next_before,
        })
    }

    async fn hydrate_one(&self, message: &message::Model) -> AppResult<MessagePayload> {
        self.message_service
            .hydrate(std::slice::from_ref(message))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal(format!("Message {} vanished", message.id)))
    }

    async fn current_preview(&self, conversation_id: i64) -> Option<LastMessagePreview> {
        match self.conversation_repo.get_by_id(conversation_id).await {
            Ok(conversation) => self.preview_of(&conversation).await,
            Err(e) => {
                warn!(error = %e, conversation_id, "Failed to load conversation for broadcast");
                None
            }
        }
    }

    async fn preview_of(&self, conversation: &conversation::Model) -> Option<LastMessagePreview> {
        match self.message_service.last_message_preview(conversation).await {
            Ok(preview) => preview,
            Err(e) => {
                warn!(error = %e, conversation_id = conversation.id, "Failed to load last message for broadcast");
                None
            }
        }
    }

    /// Send a list delta to every active participant except the actor.
    async fn fan_out_delta(
        &self,
        conversation_id: i64,
        actor_id: i64,
        preview: Option<LastMessagePreview>,
        cause: DeltaCause,
        message_id: i64,
    ) {
        let conversation = match self.conversation_repo.get_by_id(conversation_id).await {
            Ok(conversation) => conversation,
            Err(e) => {
                warn!(error = %e, conversation_id, "Failed to load conversation for broadcast");
                return;
            }
        };
        let recipients = match self
            .conversation_repo
            .find_active_participants(conversation_id)
            .await
        {
            Ok(participants) => participants,
            Err(e) => {
                warn!(error = %e, conversation_id, "Failed to load participants for broadcast");
                return;
            }
        };

        let delta = views::list_delta(&conversation, preview, cause, Some(message_id));
        let recipient_ids: Vec<i64> = recipients
            .iter()
            .map(|p| p.user_id)
            .filter(|&id| id != actor_id)
            .collect();
        self.broadcaster
            .to_users(recipient_ids, &RealtimeEvent::ConversationListDelta(delta))
            .await;
    }
}
