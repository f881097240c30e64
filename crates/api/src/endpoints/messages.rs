//! Message endpoints: history, send, edit, delete, read and typing.

use atrium_common::{AppError, AppResult, DeleteScope, MessagePage, MessagePayload};
use atrium_core::{ReadState, SendMessageInput, UploadedAttachment};
use axum::{
    Json, Router,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    routing::{get, patch, post},
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    extractors::AuthUser,
    middleware::AppState,
    response::{ApiResponse, Created, no_content},
};

/// Files accepted in one multipart send.
pub const MAX_FILES_PER_MESSAGE: usize = 10;

/// Create messages router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations/{conversation_id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/conversations/{conversation_id}/read", post(mark_read))
        .route("/conversations/{conversation_id}/typing", post(typing))
        .route("/messages/{message_id}", patch(edit_message).delete(delete_message))
}

/// History query.
#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    /// Id of the oldest message already loaded.
    pub before: Option<i64>,
    pub limit: Option<u64>,
}

async fn list_messages(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<ListMessagesQuery>,
) -> AppResult<ApiResponse<MessagePage>> {
    let page = state
        .messaging_service
        .list_messages(conversation_id, user.id, query.before, query.limit)
        .await?;
    Ok(ApiResponse::ok(page))
}

/// Send message request (JSON form).
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: Option<String>,
    pub reply_to_id: Option<i64>,
    pub client_id: Option<String>,
}

/// Send a message. Attachments require `multipart/form-data`.
async fn send_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    request: Request,
) -> AppResult<Created<MessagePayload>> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let input = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        read_multipart(conversation_id, multipart).await?
    } else {
        let Json(req) = Json::<SendMessageRequest>::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        SendMessageInput {
            conversation_id,
            body: req.body,
            reply_to_id: req.reply_to_id,
            client_id: req.client_id,
            files: Vec::new(),
        }
    };

    let message = state.messaging_service.send(user.id, input).await?;
    Ok(Created(message))
}

/// Collect the fields of a multipart send.
///
/// Text fields: `body`, `reply_to_id`, `client_id`. Every part carrying a file
/// name, or named `attachments`/`attachments[]`, becomes an attachment.
async fn read_multipart(conversation_id: i64, mut multipart: Multipart) -> AppResult<SendMessageInput> {
    let mut input = SendMessageInput {
        conversation_id,
        ..SendMessageInput::default()
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        let is_file = field.file_name().is_some() || name.starts_with("attachments");

        if is_file {
            if input.files.len() == MAX_FILES_PER_MESSAGE {
                return Err(AppError::Validation(format!(
                    "At most {MAX_FILES_PER_MESSAGE} attachments per message"
                )));
            }
            let original_name = field.file_name().map(ToString::to_string);
            let mime = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?
                .to_vec();
            debug!(size = data.len(), mime = %mime, "Received attachment part");
            input.files.push(UploadedAttachment {
                data,
                mime,
                original_name,
            });
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        match name.as_str() {
            "body" => input.body = Some(text),
            "client_id" if !text.is_empty() => input.client_id = Some(text),
            "reply_to_id" if !text.is_empty() => {
                let id = text
                    .parse()
                    .map_err(|_| AppError::BadRequest(format!("Invalid reply_to_id: {text}")))?;
                input.reply_to_id = Some(id);
            }
            _ => {}
        }
    }

    Ok(input)
}

/// Edit message request.
#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub body: String,
}

async fn edit_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Json(req): Json<EditMessageRequest>,
) -> AppResult<ApiResponse<MessagePayload>> {
    let message = state
        .messaging_service
        .edit(user.id, message_id, req.body)
        .await?;
    Ok(ApiResponse::ok(message))
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageQuery {
    #[serde(default)]
    pub scope: DeleteScope,
}

async fn delete_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Query(query): Query<DeleteMessageQuery>,
) -> AppResult<StatusCode> {
    state
        .messaging_service
        .delete(user.id, message_id, query.scope)
        .await?;
    Ok(no_content())
}

/// Read advance request.
#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub last_read_message_id: i64,
}

async fn mark_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(req): Json<MarkReadRequest>,
) -> AppResult<ApiResponse<ReadState>> {
    let read = state
        .messaging_service
        .mark_read(conversation_id, user.id, req.last_read_message_id)
        .await?;
    Ok(ApiResponse::ok(read))
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub is_typing: bool,
}

async fn typing(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(req): Json<TypingRequest>,
) -> AppResult<StatusCode> {
    state
        .messaging_service
        .set_typing(conversation_id, user.id, req.is_typing)
        .await?;
    Ok(no_content())
}
