//! Database entities.

pub mod conversation;
pub mod conversation_participant;
pub mod message;
pub mod message_attachment;
pub mod message_hidden;
pub mod user;

pub use conversation::Entity as Conversation;
pub use conversation_participant::Entity as ConversationParticipant;
pub use message::Entity as Message;
pub use message_attachment::Entity as MessageAttachment;
pub use message_hidden::Entity as MessageHidden;
pub use user::Entity as User;
