//! API endpoints.

mod attachments;
mod conversations;
mod messages;
mod users;

use axum::Router;

use crate::middleware::AppState;
use crate::sse;

pub use messages::MAX_FILES_PER_MESSAGE;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/users", users::router())
        .nest("/conversations", conversations::router())
        .merge(messages::router())
        .nest("/attachments", attachments::router())
        .nest("/streaming", sse::router())
}
