//! API middleware.

#![allow(missing_docs)]

use atrium_core::{AttachmentService, ConversationService, MessagingService, UserService};
use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::sse::RealtimeHub;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub user_service: UserService,
    pub conversation_service: ConversationService,
    pub messaging_service: MessagingService,
    pub attachment_service: AttachmentService,
    pub realtime: RealtimeHub,
}

/// Authentication middleware.
///
/// A valid bearer token puts the user into the request extensions; anything
/// else leaves the request anonymous and [`crate::extractors::AuthUser`]
/// rejects it where a user is required.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);

    if let Some(token) = token {
        match state.user_service.authenticate(&token).await {
            Ok(user) => {
                req.extensions_mut().insert(user);
            }
            Err(e) => debug!(error = %e, "Rejected bearer token"),
        }
    }

    next.run(req).await
}
