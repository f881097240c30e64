//! Common utilities and shared types for atrium.
//!
//! This crate provides foundational components used across all atrium crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Clock**: Injectable time source via [`Clock`]
//! - **Events**: The realtime wire protocol via [`RealtimeEvent`] and [`Channel`]
//! - **ID Generation**: ULID-based storage names via [`IdGenerator`]
//! - **Storage**: Attachment file backends
//!
//! # Example
//!
//! ```no_run
//! use atrium_common::{AppResult, Config};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     println!("edit window: {} minutes", config.messaging.edit_window_minutes);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod id;
pub mod storage;

pub use clock::{Clock, ClockService, ManualClock, SystemClock};
pub use config::{Config, MaintenanceConfig, MessagingConfig, StorageSettings};
pub use error::{AppError, AppResult};
pub use events::{
    Channel, ConversationSummary, DeleteScope, Envelope, MessagePage, MessagePayload,
    RealtimeEvent,
};
pub use id::IdGenerator;
pub use storage::{
    ByteStream, LocalStorage, StorageBackend, UploadedFile, generate_storage_key,
};
