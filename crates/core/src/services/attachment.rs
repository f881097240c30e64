//! Attachment handler: file validation, storage, thumbnails and access checks.

use std::io::Cursor;
use std::sync::Arc;

use atrium_common::{
    AppError, AppResult, ByteStream, ClockService, StorageBackend, StorageSettings,
    generate_storage_key,
};
use atrium_db::{
    entities::message_attachment,
    repositories::{AttachmentRepository, ConversationRepository, NewAttachment},
};
use image::ImageFormat;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::services::access::{Denial, require_participant};

/// Longest side of a generated thumbnail.
pub const THUMBNAIL_MAX_SIDE: u32 = 320;

/// A file received from a client, not yet stored.
#[derive(Debug, Clone)]
pub struct UploadedAttachment {
    pub data: Vec<u8>,
    pub mime: String,
    pub original_name: Option<String>,
}

/// Decoded image facts.
struct ImageInfo {
    width: u32,
    height: u32,
    thumbnail_png: Vec<u8>,
}

/// Attachment service.
#[derive(Clone)]
pub struct AttachmentService {
    storage: Arc<dyn StorageBackend>,
    attachment_repo: AttachmentRepository,
    conversation_repo: ConversationRepository,
    settings: StorageSettings,
    clock: ClockService,
}

impl AttachmentService {
    /// Create a new attachment service.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        attachment_repo: AttachmentRepository,
        conversation_repo: ConversationRepository,
        settings: StorageSettings,
        clock: ClockService,
    ) -> Self {
        Self {
            storage,
            attachment_repo,
            conversation_repo,
            settings,
            clock,
        }
    }

    /// Reject files that are empty, too large or carry a malformed mime type.
    pub fn validate(&self, file: &UploadedAttachment) -> AppResult<()> {
        if file.data.is_empty() {
            return Err(AppError::Validation("Attachment is empty".to_string()));
        }
        if file.data.len() > self.settings.max_attachment_bytes {
            return Err(AppError::Validation(format!(
                "Attachment too large. Maximum size is {} bytes",
                self.settings.max_attachment_bytes
            )));
        }
        if !is_valid_mime(&file.mime) {
            return Err(AppError::Validation(format!(
                "Invalid attachment type: {}",
                file.mime
            )));
        }
        Ok(())
    }

    /// Write a file to storage and describe the row to insert.
    ///
    /// Images get their dimensions recorded and a PNG thumbnail. A failed
    /// decode or thumbnail write leaves the attachment without them.
    pub async fn store(&self, file: UploadedAttachment) -> AppResult<NewAttachment> {
        self.validate(&file)?;

        let original_name = file.original_name.clone().unwrap_or_default();
        let key = generate_storage_key(&self.settings.attachments_dir, &original_name);
        let uploaded = self.storage.upload(&key, &file.data, &file.mime).await?;

        let mut metadata = json!({ "md5": uploaded.md5 });
        let mut width = None;
        let mut height = None;

        if file.mime.starts_with("image/") {
            match inspect_image(file.data).await {
                Ok(info) => {
                    width = i32::try_from(info.width).ok();
                    height = i32::try_from(info.height).ok();

                    let thumb_key = generate_storage_key(&self.settings.thumbnails_dir, "thumb.png");
                    match self
                        .storage
                        .upload(&thumb_key, &info.thumbnail_png, "image/png")
                        .await
                    {
                        Ok(_) => metadata["thumbnail_path"] = json!(thumb_key),
                        Err(e) => warn!(error = %e, key = %key, "Failed to store thumbnail"),
                    }
                }
                Err(e) => warn!(error = %e, key = %key, "Failed to decode image attachment"),
            }
        }

        debug!(key = %key, size = uploaded.size, mime = %file.mime, "Stored attachment");

        Ok(NewAttachment {
            disk: self.storage.disk().to_string(),
            path: key,
            mime: file.mime,
            size: i64::try_from(uploaded.size).unwrap_or(i64::MAX),
            width,
            height,
            original_name: file.original_name,
            metadata: Some(metadata),
        })
    }

    /// Validate every file first, then store them in order.
    pub async fn store_all(&self, files: Vec<UploadedAttachment>) -> AppResult<Vec<NewAttachment>> {
        for file in &files {
            self.validate(file)?;
        }

        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            match self.store(file).await {
                Ok(attachment) => stored.push(attachment),
                Err(e) => {
                    self.discard(&stored).await;
                    return Err(e);
                }
            }
        }
        Ok(stored)
    }

    /// Remove stored files that never made it into a committed message.
    pub async fn discard(&self, attachments: &[NewAttachment]) {
        for attachment in attachments {
            let thumbnail = attachment
                .metadata
                .as_ref()
                .and_then(|m| m.get("thumbnail_path"))
                .and_then(|v| v.as_str());
            for key in std::iter::once(attachment.path.as_str()).chain(thumbnail) {
                if let Err(e) = self.storage.delete(key).await {
                    warn!(error = %e, key = %key, "Failed to discard attachment file");
                }
            }
        }
    }

    /// Open an attachment for a requester who must be an active participant.
    pub async fn open(
        &self,
        attachment_id: i64,
        requester_id: i64,
    ) -> AppResult<(message_attachment::Model, ByteStream)> {
        let attachment = self.authorize(attachment_id, requester_id).await?;
        let stream = self.storage.open(&attachment.path).await?;
        Ok((attachment, stream))
    }

    /// Open the thumbnail of an image attachment.
    pub async fn open_thumbnail(
        &self,
        attachment_id: i64,
        requester_id: i64,
    ) -> AppResult<ByteStream> {
        let attachment = self.authorize(attachment_id, requester_id).await?;
        let key = attachment
            .thumbnail_path()
            .ok_or_else(|| AppError::NotFound(format!("Thumbnail of attachment {attachment_id}")))?;
        self.storage.open(key).await
    }

    /// Delete files of attachments whose message was deleted for everyone.
    pub async fn purge_deleted(&self, limit: u64) -> AppResult<u64> {
        let attachments = self.attachment_repo.find_purgeable(limit).await?;
        let mut purged = 0;

        for attachment in attachments {
            if attachment.disk != self.storage.disk() {
                warn!(
                    attachment_id = attachment.id,
                    disk = %attachment.disk,
                    "Skipping attachment stored on another disk"
                );
                continue;
            }

            let mut keys = vec![attachment.path.as_str()];
            keys.extend(attachment.thumbnail_path());
            let mut failed = false;
            for key in keys {
                if let Err(e) = self.storage.delete(key).await {
                    warn!(error = %e, attachment_id = attachment.id, "Failed to delete attachment file");
                    failed = true;
                }
            }
            if failed {
                continue;
            }

            self.attachment_repo
                .mark_purged(attachment.id, self.clock.now().into())
                .await?;
            purged += 1;
        }

        if purged > 0 {
            info!(purged, "Purged attachments of deleted messages");
        }
        Ok(purged)
    }

    /// Resolve an attachment the requester may read.
    ///
    /// Membership is checked before anything about the message is revealed.
    async fn authorize(
        &self,
        attachment_id: i64,
        requester_id: i64,
    ) -> AppResult<message_attachment::Model> {
        let (attachment, message) = self
            .attachment_repo
            .find_with_message(attachment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Attachment {attachment_id}")))?;

        require_participant(
            &self.conversation_repo,
            message.conversation_id,
            requester_id,
            Denial::Forbidden,
        )
        .await?;

        if message.is_deleted() || attachment.purged_at.is_some() {
            return Err(AppError::NotFound(format!("Attachment {attachment_id}")));
        }
        if attachment.disk != self.storage.disk() {
            return Err(AppError::Storage(format!(
                "Attachment {attachment_id} is stored on unknown disk {}",
                attachment.disk
            )));
        }

        Ok(attachment)
    }
}

/// `type/subtype` with token characters only.
fn is_valid_mime(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    let is_token = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
    };
    is_token(kind) && is_token(subtype)
}

async fn inspect_image(data: Vec<u8>) -> AppResult<ImageInfo> {
    tokio::task::spawn_blocking(move || {
        let decoded =
            image::load_from_memory(&data).map_err(|e| AppError::Internal(e.to_string()))?;
        let thumbnail = decoded.thumbnail(THUMBNAIL_MAX_SIDE, THUMBNAIL_MAX_SIDE);

        let mut thumbnail_png = Vec::new();
        thumbnail
            .write_to(&mut Cursor::new(&mut thumbnail_png), ImageFormat::Png)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(ImageInfo {
            width: decoded.width(),
            height: decoded.height(),
            thumbnail_png,
        })
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
}
