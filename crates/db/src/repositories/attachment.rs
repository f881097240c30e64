//! Message attachment repository.

use std::sync::Arc;

use crate::entities::{
    Message, MessageAttachment, message, message::MessageStatus, message_attachment,
};
use atrium_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    prelude::DateTimeWithTimeZone,
    sea_query::{Expr, Query},
};

/// Repository for message attachments.
#[derive(Clone)]
pub struct AttachmentRepository {
    db: Arc<DatabaseConnection>,
}

impl AttachmentRepository {
    /// Create a new attachment repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an attachment together with the message that owns it.
    pub async fn find_with_message(
        &self,
        id: i64,
    ) -> AppResult<Option<(message_attachment::Model, message::Model)>> {
        let row = MessageAttachment::find_by_id(id)
            .find_also_related(Message)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.and_then(|(attachment, message)| message.map(|m| (attachment, m))))
    }

    /// Attachments of soft-deleted messages whose files are still on disk.
    pub async fn find_purgeable(&self, limit: u64) -> AppResult<Vec<message_attachment::Model>> {
        let deleted_messages = Query::select()
            .column(message::Column::Id)
            .from(Message)
            .and_where(message::Column::Status.eq(MessageStatus::Deleted))
            .to_owned();

        MessageAttachment::find()
            .filter(message_attachment::Column::PurgedAt.is_null())
            .filter(message_attachment::Column::MessageId.in_subquery(deleted_messages))
            .order_by_asc(message_attachment::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Record that the files of an attachment were removed.
    pub async fn mark_purged(&self, id: i64, now: DateTimeWithTimeZone) -> AppResult<()> {
        MessageAttachment::update_many()
            .col_expr(message_attachment::Column::PurgedAt, Expr::value(now))
            .filter(message_attachment::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
