//! Attachment endpoints. Files are streamed from storage, never buffered.

use atrium_common::{AppError, AppResult, ByteStream};
use atrium_db::entities::message_attachment;
use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
    routing::get,
};

use crate::{extractors::AuthUser, middleware::AppState};

/// Create attachments router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{attachment_id}", get(stream))
        .route("/{attachment_id}/download", get(download))
        .route("/{attachment_id}/thumbnail", get(thumbnail))
}

#[derive(Debug, Clone, Copy)]
enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }
}

/// Header-safe file name: ASCII only, no quotes or control characters.
fn header_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn file_response(
    attachment: &message_attachment::Model,
    stream: ByteStream,
    disposition: Disposition,
) -> AppResult<Response> {
    let file_name = attachment
        .original_name
        .as_deref()
        .map_or_else(|| format!("attachment-{}", attachment.id), header_file_name);

    Response::builder()
        .header(header::CONTENT_TYPE, attachment.mime.as_str())
        .header(header::CONTENT_LENGTH, attachment.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("{}; filename=\"{file_name}\"", disposition.as_str()),
        )
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn stream(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(attachment_id): Path<i64>,
) -> AppResult<Response> {
    let (attachment, stream) = state.attachment_service.open(attachment_id, user.id).await?;
    file_response(&attachment, stream, Disposition::Inline)
}

async fn download(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(attachment_id): Path<i64>,
) -> AppResult<Response> {
    let (attachment, stream) = state.attachment_service.open(attachment_id, user.id).await?;
    file_response(&attachment, stream, Disposition::Attachment)
}

async fn thumbnail(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(attachment_id): Path<i64>,
) -> AppResult<Response> {
    let stream = state
        .attachment_service
        .open_thumbnail(attachment_id, user.id)
        .await?;

    Response::builder()
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_file_name() {
        assert_eq!(header_file_name("report.pdf"), "report.pdf");
        assert_eq!(header_file_name("a\"b\\c.txt"), "a_b_c.txt");
        assert_eq!(header_file_name("résumé.pdf"), "r_sum_.pdf");
        assert_eq!(header_file_name("line\nbreak"), "line_break");
    }
}
