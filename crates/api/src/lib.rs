//! HTTP API layer for atrium.
//!
//! This crate provides the REST API and realtime streaming:
//!
//! - **Endpoints**: Conversations, messages, attachments, users
//! - **Extractors**: Bearer token authentication
//! - **Streaming**: Server-Sent Events fed by [`RealtimeHub`]
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod sse;

use atrium_common::StorageSettings;
use axum::{Router, extract::DefaultBodyLimit};

pub use endpoints::{MAX_FILES_PER_MESSAGE, router};
pub use middleware::AppState;
pub use sse::RealtimeHub;

/// Room for the multipart framing and text fields around the files.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Largest request body the API accepts: a full load of maximum-size files.
#[must_use]
pub const fn request_body_limit(settings: &StorageSettings) -> usize {
    settings
        .max_attachment_bytes
        .saturating_mul(MAX_FILES_PER_MESSAGE)
        .saturating_add(FORM_OVERHEAD_BYTES)
}

/// The API mounted under `/api` with authentication and the body limit applied.
pub fn app(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .nest("/api", router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
