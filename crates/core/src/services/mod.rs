//! Business logic services.

#![allow(missing_docs)]

pub mod access;
pub mod attachment;
pub mod broadcaster;
pub mod conversation;
pub mod event_publisher;
pub mod message;
pub mod messaging;
pub mod user;
pub mod views;

pub use access::Denial;
pub use attachment::{AttachmentService, UploadedAttachment};
pub use broadcaster::EventBroadcaster;
pub use conversation::{
    ConversationService, CreateGroupInput, ListConversationsInput, UpdateGroupInput,
};
pub use event_publisher::{
    EventPublisher, EventPublisherService, NoOpEventPublisher, RecordingEventPublisher,
};
pub use message::{AppendMessageInput, MessagePageRows, MessageService};
pub use messaging::{MessagingService, ReadState, SendMessageInput};
pub use user::{CreateUserInput, UserService};
