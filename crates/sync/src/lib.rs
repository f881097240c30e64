//! Client-side state for atrium conversations.
//!
//! Holds a conversation list and open thread views, and folds realtime
//! envelopes into them. Every `apply` is idempotent and tolerant of
//! reordering, so a client can replay a backlog or receive the same event
//! twice over two channels without drifting.

pub mod list;
pub mod reconciler;
pub mod thread;

pub use list::{ConversationEntry, ConversationList};
pub use reconciler::{Applied, Reconciler};
pub use thread::{PendingMessage, PendingState, ThreadView};
