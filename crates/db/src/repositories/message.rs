//! Message repository.
//!
//! Writes that touch more than one table (append, soft delete) run in a single
//! transaction. Reads never return tombstoned rows unless asked for by id.

use std::sync::Arc;

use crate::entities::{
    Conversation, ConversationParticipant, Message, MessageAttachment, MessageHidden,
    conversation, conversation_participant, message, message::MessageStatus, message::MessageType,
    message_attachment, message_hidden,
};
use crate::repositories::is_unique_violation;
use atrium_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    prelude::{DateTimeWithTimeZone, Json},
    sea_query::{Expr, Query},
};

/// Message about to be appended.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub message_type: MessageType,
    pub body: Option<String>,
    pub reply_to_id: Option<i64>,
    pub client_id: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

/// Attachment row written together with its message. The file is already on disk.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub disk: String,
    pub path: String,
    pub mime: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub original_name: Option<String>,
    pub metadata: Option<Json>,
}

/// Keyset position: `(created_at, id)` of the oldest message already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: DateTimeWithTimeZone,
    pub id: i64,
}

/// Result of a soft delete.
#[derive(Debug, Clone)]
pub struct SoftDeleted {
    pub message: message::Model,
    pub conversation: conversation::Model,
    /// Whether the conversation's last-message pointer had to be recomputed.
    pub pointer_moved: bool,
}

/// Repository for messages.
#[derive(Clone)]
pub struct MessageRepository {
    db: Arc<DatabaseConnection>,
}

impl MessageRepository {
    /// Create a new message repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a message by ID, including tombstoned ones.
    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<message::Model>> {
        Message::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a message that is not soft-deleted.
    pub async fn get_active(&self, id: i64) -> AppResult<message::Model> {
        self.find_by_id(id)
            .await?
            .filter(|m| !m.is_deleted())
            .ok_or_else(|| AppError::NotFound(format!("Message {id}")))
    }

    /// Find messages by IDs.
    pub async fn find_by_ids(&self, ids: &[i64]) -> AppResult<Vec<message::Model>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        Message::find()
            .filter(message::Column::Id.is_in(ids.iter().copied()))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a previous send carrying the same client token.
    pub async fn find_by_client_id(
        &self,
        conversation_id: i64,
        sender_id: i64,
        client_id: &str,
    ) -> AppResult<Option<message::Model>> {
        Message::find()
            .filter(message::Column::ConversationId.eq(conversation_id))
            .filter(message::Column::SenderId.eq(sender_id))
            .filter(message::Column::ClientId.eq(client_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert a message with its attachments, point the conversation at it and
    /// move the sender's read cursor to it, all in one transaction.
    pub async fn append(
        &self,
        new_message: NewMessage,
        attachments: Vec<NewAttachment>,
    ) -> AppResult<(message::Model, Vec<message_attachment::Model>)> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let conversation_id = new_message.conversation_id;
        let sender_id = new_message.sender_id;
        let created_at = new_message.created_at;

        let inserted = message::ActiveModel {
            conversation_id: Set(conversation_id),
            sender_id: Set(sender_id),
            message_type: Set(new_message.message_type),
            body: Set(new_message.body),
            reply_to_id: Set(new_message.reply_to_id),
            client_id: Set(new_message.client_id),
            status: Set(MessageStatus::Active),
            delivered_at: Set(Some(created_at)),
            read_at: Set(None),
            edited_at: Set(None),
            deleted_at: Set(None),
            created_at: Set(created_at),
            updated_at: Set(created_at),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Message with this client_id already exists".to_string())
            } else {
                AppError::Database(e.to_string())
            }
        })?;

        let mut stored = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let row = message_attachment::ActiveModel {
                message_id: Set(inserted.id),
                disk: Set(attachment.disk),
                path: Set(attachment.path),
                mime: Set(attachment.mime),
                size: Set(attachment.size),
                width: Set(attachment.width),
                height: Set(attachment.height),
                original_name: Set(attachment.original_name),
                metadata: Set(attachment.metadata),
                created_at: Set(created_at),
                purged_at: Set(None),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
            stored.push(row);
        }

        Conversation::update_many()
            .col_expr(conversation::Column::LastMessageId, Expr::value(inserted.id))
            .col_expr(conversation::Column::UpdatedAt, Expr::value(created_at))
            .filter(conversation::Column::Id.eq(conversation_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        ConversationParticipant::update_many()
            .col_expr(
                conversation_participant::Column::LastReadMessageId,
                Expr::value(inserted.id),
            )
            .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participant::Column::UserId.eq(sender_id))
            .filter(
                Condition::any()
                    .add(conversation_participant::Column::LastReadMessageId.is_null())
                    .add(conversation_participant::Column::LastReadMessageId.lt(inserted.id)),
            )
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok((inserted, stored))
    }

    /// Replace the body of a message and stamp `edited_at`.
    pub async fn update_body(
        &self,
        message: message::Model,
        body: String,
        edited_at: DateTimeWithTimeZone,
    ) -> AppResult<message::Model> {
        let conversation_id = message.conversation_id;
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut active: message::ActiveModel = message.into();
        active.body = Set(Some(body));
        active.edited_at = Set(Some(edited_at));
        active.updated_at = Set(edited_at);
        let updated = active
            .update(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        touch_conversation(&txn, conversation_id, edited_at).await?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(updated)
    }

    /// Tombstone a message for everyone. If it was the conversation's last message
    /// the pointer moves to the newest surviving message, or to null.
    pub async fn soft_delete(
        &self,
        message_id: i64,
        deleted_at: DateTimeWithTimeZone,
    ) -> AppResult<SoftDeleted> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let result = Message::update_many()
            .col_expr(message::Column::Status, Expr::value(MessageStatus::Deleted))
            .col_expr(message::Column::DeletedAt, Expr::value(deleted_at))
            .col_expr(message::Column::UpdatedAt, Expr::value(deleted_at))
            .filter(message::Column::Id.eq(message_id))
            .filter(message::Column::Status.eq(MessageStatus::Active))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Message {message_id}")));
        }

        let deleted = Message::find_by_id(message_id)
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(format!("Message {message_id}")))?;

        let current = Conversation::find_by_id(deleted.conversation_id)
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(format!("Conversation {}", deleted.conversation_id)))?;

        let pointer_moved = current.last_message_id == Some(message_id);
        let mut active: conversation::ActiveModel = current.into();
        if pointer_moved {
            let survivor = Message::find()
                .filter(message::Column::ConversationId.eq(deleted.conversation_id))
                .filter(message::Column::Status.eq(MessageStatus::Active))
                .order_by_desc(message::Column::CreatedAt)
                .order_by_desc(message::Column::Id)
                .one(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            active.last_message_id = Set(survivor.map(|m| m.id));
        }
        active.updated_at = Set(deleted_at);
        let conversation = active
            .update(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(SoftDeleted {
            message: deleted,
            conversation,
            pointer_moved,
        })
    }

    /// Hide a message from one user. Hiding twice is a no-op.
    pub async fn hide_for_user(
        &self,
        message_id: i64,
        user_id: i64,
        now: DateTimeWithTimeZone,
    ) -> AppResult<()> {
        let result = message_hidden::ActiveModel {
            message_id: Set(message_id),
            user_id: Set(user_id),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Ok(()),
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    /// Newest-first page of visible messages strictly older than `before`.
    pub async fn page(
        &self,
        conversation_id: i64,
        viewer_id: i64,
        before: Option<PageCursor>,
        limit: u64,
    ) -> AppResult<Vec<message::Model>> {
        let hidden = Query::select()
            .column(message_hidden::Column::MessageId)
            .from(MessageHidden)
            .and_where(message_hidden::Column::UserId.eq(viewer_id))
            .to_owned();

        let mut query = Message::find()
            .filter(message::Column::ConversationId.eq(conversation_id))
            .filter(message::Column::Status.eq(MessageStatus::Active))
            .filter(message::Column::Id.not_in_subquery(hidden));

        if let Some(cursor) = before {
            query = query.filter(
                Condition::any()
                    .add(message::Column::CreatedAt.lt(cursor.created_at))
                    .add(
                        Condition::all()
                            .add(message::Column::CreatedAt.eq(cursor.created_at))
                            .add(message::Column::Id.lt(cursor.id)),
                    ),
            );
        }

        query
            .order_by_desc(message::Column::CreatedAt)
            .order_by_desc(message::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Newest message that is not soft-deleted.
    pub async fn find_latest_active(
        &self,
        conversation_id: i64,
    ) -> AppResult<Option<message::Model>> {
        Message::find()
            .filter(message::Column::ConversationId.eq(conversation_id))
            .filter(message::Column::Status.eq(MessageStatus::Active))
            .order_by_desc(message::Column::CreatedAt)
            .order_by_desc(message::Column::Id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Active messages from other senders newer than the read cursor.
    pub async fn count_unread(
        &self,
        conversation_id: i64,
        user_id: i64,
        last_read_message_id: Option<i64>,
    ) -> AppResult<u64> {
        let mut query = Message::find()
            .filter(message::Column::ConversationId.eq(conversation_id))
            .filter(message::Column::Status.eq(MessageStatus::Active))
            .filter(message::Column::SenderId.ne(user_id));

        if let Some(cursor) = last_read_message_id {
            query = query.filter(message::Column::Id.gt(cursor));
        }

        query
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count all messages of a conversation, tombstones included.
    pub async fn count_in_conversation(&self, conversation_id: i64) -> AppResult<u64> {
        Message::find()
            .filter(message::Column::ConversationId.eq(conversation_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Attachments of the given messages.
    pub async fn find_attachments(
        &self,
        message_ids: &[i64],
    ) -> AppResult<Vec<message_attachment::Model>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        MessageAttachment::find()
            .filter(message_attachment::Column::MessageId.is_in(message_ids.iter().copied()))
            .order_by_asc(message_attachment::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

async fn touch_conversation<C: ConnectionTrait>(
    db: &C,
    conversation_id: i64,
    now: DateTimeWithTimeZone,
) -> AppResult<()> {
    Conversation::update_many()
        .col_expr(conversation::Column::UpdatedAt, Expr::value(now))
        .filter(conversation::Column::Id.eq(conversation_id))
        .exec(db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(())
}
