//! Repositories wrapping database access for each aggregate.

mod attachment;
mod conversation;
mod message;
mod user;

pub use attachment::AttachmentRepository;
pub use conversation::{ConversationListFilter, ConversationRepository};
pub use message::{MessageRepository, NewAttachment, NewMessage, PageCursor, SoftDeleted};
pub use user::UserRepository;

use sea_orm::{DbErr, SqlErr};

/// Whether a database error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
