//! Conversation endpoints.

use atrium_common::{AppError, AppResult, ConversationSummary};
use atrium_core::{CreateGroupInput, ListConversationsInput, UpdateGroupInput};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    extractors::AuthUser,
    middleware::AppState,
    response::{ApiResponse, Created, no_content},
};

/// Create conversations router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_conversations).post(create_conversation))
        .route("/{conversation_id}", get(get_conversation).patch(update_conversation))
        .route("/{conversation_id}/members", post(add_members))
        .route("/{conversation_id}/leave", post(leave))
        .route("/{conversation_id}/archive", post(toggle_archive))
        .route("/{conversation_id}/pin", post(toggle_pin))
        .route("/{conversation_id}/mute", post(mute))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Create conversation request.
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    /// Partner of a direct conversation.
    pub user_id: Option<i64>,
    /// Initial members of a group besides the creator.
    #[serde(default)]
    pub user_ids: Vec<i64>,
    pub title: Option<String>,
    pub icon_path: Option<String>,
}

async fn create_conversation(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> AppResult<Created<ConversationSummary>> {
    let summary = match req.kind {
        ConversationKind::Direct => {
            let partner_id = req.user_id.ok_or_else(|| {
                AppError::Validation("user_id is required for a direct conversation".to_string())
            })?;
            state
                .conversation_service
                .create_or_reuse_direct(user.id, partner_id)
                .await?
        }
        ConversationKind::Group => {
            state
                .conversation_service
                .create_group(
                    user.id,
                    CreateGroupInput {
                        title: req.title,
                        icon_path: req.icon_path,
                        member_ids: req.user_ids,
                    },
                )
                .await?
        }
    };

    Ok(Created(summary))
}

async fn list_conversations(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListConversationsInput>,
) -> AppResult<ApiResponse<Vec<ConversationSummary>>> {
    let conversations = state
        .conversation_service
        .list_for_user(user.id, query)
        .await?;
    Ok(ApiResponse::ok(conversations))
}

async fn get_conversation(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> AppResult<ApiResponse<ConversationSummary>> {
    let summary = state
        .conversation_service
        .get_for_user(conversation_id, user.id)
        .await?;
    Ok(ApiResponse::ok(summary))
}

async fn update_conversation(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(input): Json<UpdateGroupInput>,
) -> AppResult<ApiResponse<ConversationSummary>> {
    let summary = state
        .conversation_service
        .update_group(conversation_id, user.id, input)
        .await?;
    Ok(ApiResponse::ok(summary))
}

/// Add members request.
#[derive(Debug, Deserialize)]
pub struct AddMembersRequest {
    pub user_ids: Vec<i64>,
}

async fn add_members(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(req): Json<AddMembersRequest>,
) -> AppResult<ApiResponse<ConversationSummary>> {
    let summary = state
        .conversation_service
        .add_members(conversation_id, user.id, &req.user_ids)
        .await?;
    Ok(ApiResponse::ok(summary))
}

async fn leave(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.conversation_service.leave(conversation_id, user.id).await?;
    Ok(no_content())
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub archived: bool,
}

async fn toggle_archive(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> AppResult<ApiResponse<ArchiveResponse>> {
    let archived = state
        .conversation_service
        .toggle_archive(conversation_id, user.id)
        .await?;
    Ok(ApiResponse::ok(ArchiveResponse { archived }))
}

#[derive(Debug, Serialize)]
pub struct PinResponse {
    pub pinned: bool,
}

async fn toggle_pin(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> AppResult<ApiResponse<PinResponse>> {
    let pinned = state
        .conversation_service
        .toggle_pin(conversation_id, user.id)
        .await?;
    Ok(ApiResponse::ok(PinResponse { pinned }))
}

/// Mute request. A missing `until` unmutes.
#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub until: Option<DateTime<Utc>>,
}

async fn mute(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(req): Json<MuteRequest>,
) -> AppResult<StatusCode> {
    state
        .conversation_service
        .mute(conversation_id, user.id, req.until)
        .await?;
    Ok(no_content())
}
