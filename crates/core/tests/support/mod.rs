//! Shared wiring for service tests.

#![allow(clippy::unwrap_used, dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use atrium_common::{
    Clock, ClockService, Envelope, LocalStorage, ManualClock, MessagingConfig, RealtimeEvent,
    StorageSettings,
};
use atrium_core::{
    AttachmentService, ConversationService, EventPublisherService, MessageService,
    MessagingService, RecordingEventPublisher, SendMessageInput, UploadedAttachment,
};
use atrium_db::entities::user;
use atrium_db::repositories::{
    AttachmentRepository, ConversationRepository, MessageRepository, UserRepository,
};
use atrium_db::test_utils::{TestDatabase, create_user};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

pub struct Harness {
    pub db: TestDatabase,
    pub files: TempDir,
    pub clock: ManualClock,
    pub recorder: RecordingEventPublisher,
    pub conversations: ConversationService,
    pub messaging: MessagingService,
    pub attachments: AttachmentService,
}

impl Harness {
    pub async fn new() -> Self {
        let recorder = RecordingEventPublisher::new();
        Self::with_publisher(recorder.clone(), Arc::new(recorder)).await
    }

    pub async fn with_publisher(
        recorder: RecordingEventPublisher,
        publisher: EventPublisherService,
    ) -> Self {
        let db = TestDatabase::new().await.unwrap();
        let conn = db.shared();
        let files = tempfile::tempdir().unwrap();

        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        let clock_service: ClockService = Arc::new(clock.clone());

        let message_service = MessageService::new(
            MessageRepository::new(conn.clone()),
            UserRepository::new(conn.clone()),
            clock_service.clone(),
            MessagingConfig::default(),
        );

        let settings = StorageSettings {
            base_path: files.path().to_path_buf(),
            ..StorageSettings::default()
        };
        let storage = Arc::new(LocalStorage::new(
            settings.disk.clone(),
            settings.base_path.clone(),
            settings.base_url.clone(),
        ));
        let attachments = AttachmentService::new(
            storage,
            AttachmentRepository::new(conn.clone()),
            ConversationRepository::new(conn.clone()),
            settings,
            clock_service.clone(),
        );

        let mut conversations = ConversationService::new(
            ConversationRepository::new(conn.clone()),
            UserRepository::new(conn.clone()),
            message_service.clone(),
            clock_service.clone(),
        );
        conversations.set_event_publisher(publisher.clone());

        let mut messaging = MessagingService::new(
            ConversationRepository::new(conn),
            message_service,
            attachments.clone(),
            clock_service,
        );
        messaging.set_event_publisher(publisher);

        Self {
            db,
            files,
            clock,
            recorder,
            conversations,
            messaging,
            attachments,
        }
    }

    pub async fn user(&self, username: &str, display_name: &str) -> user::Model {
        create_user(self.db.connection(), username, display_name)
            .await
            .unwrap()
    }

    pub async fn send_text(&self, conversation_id: i64, sender_id: i64, body: &str) -> i64 {
        self.messaging
            .send(sender_id, text(conversation_id, body))
            .await
            .unwrap()
            .id
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn events(&self) -> Vec<Envelope> {
        self.recorder.envelopes().await
    }

    pub async fn deltas(&self) -> Vec<(i64, atrium_common::events::ConversationListDelta)> {
        self.events()
            .await
            .into_iter()
            .filter_map(|e| match (e.channel, e.event) {
                (atrium_common::Channel::User(id), RealtimeEvent::ConversationListDelta(d)) => {
                    Some((id, d))
                }
                _ => None,
            })
            .collect()
    }
}

pub fn text(conversation_id: i64, body: &str) -> SendMessageInput {
    SendMessageInput {
        conversation_id,
        body: Some(body.to_string()),
        ..SendMessageInput::default()
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
    let mut data = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
        .unwrap();
    data
}

pub fn upload(data: Vec<u8>, mime: &str, name: &str) -> UploadedAttachment {
    UploadedAttachment {
        data,
        mime: mime.to_string(),
        original_name: Some(name.to_string()),
    }
}
