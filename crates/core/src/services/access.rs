//! Participant checks shared by the services.

use atrium_common::{AppError, AppResult};
use atrium_db::{entities::conversation_participant, repositories::ConversationRepository};

/// How a failed membership check is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Listing and reading: the conversation does not exist for this user.
    NotFound,
    /// Acting on a resource by id.
    Forbidden,
}

/// Load the caller's participant row, failing unless they are active in the conversation.
pub async fn require_participant(
    repo: &ConversationRepository,
    conversation_id: i64,
    user_id: i64,
    denial: Denial,
) -> AppResult<conversation_participant::Model> {
    match repo.find_active_participant(conversation_id, user_id).await? {
        Some(participant) => Ok(participant),
        None => Err(match denial {
            Denial::NotFound => AppError::NotFound(format!("Conversation {conversation_id}")),
            Denial::Forbidden => AppError::Forbidden(format!(
                "Not a participant of conversation {conversation_id}"
            )),
        }),
    }
}
