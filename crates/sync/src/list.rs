//! Conversation list kept current from `ConversationListDelta` events.

use std::collections::HashSet;

use atrium_common::{
    ConversationSummary,
    events::{ConversationListDelta, ConversationSnapshot, DeltaCause, LastMessagePreview},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationEntry {
    pub id: i64,
    pub kind: String,
    pub title: Option<String>,
    pub icon_path: Option<String>,
    pub last_message: Option<LastMessagePreview>,
    pub unread_count: u64,
    pub last_read_message_id: Option<i64>,
    pub pinned: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub archived: bool,
    /// Sort key. Starts at the last message time (creation time when empty)
    /// and is bumped to the `updated_at` of every delta applied later.
    pub activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationEntry {
    fn from_delta(delta: &ConversationListDelta) -> Self {
        Self {
            id: delta.conversation_id,
            kind: delta.kind.clone(),
            title: delta.title.clone(),
            icon_path: delta.icon_path.clone(),
            last_message: delta.last_message.clone(),
            unread_count: u64::try_from(delta.unread_delta.max(0)).unwrap_or(0),
            last_read_message_id: None,
            pinned: false,
            muted_until: None,
            archived: false,
            activity_at: delta.updated_at,
            created_at: delta.updated_at,
            updated_at: delta.updated_at,
        }
    }
}

impl From<ConversationSummary> for ConversationEntry {
    fn from(summary: ConversationSummary) -> Self {
        let activity_at = summary
            .last_message
            .as_ref()
            .map_or(summary.created_at, |m| m.created_at);
        Self {
            id: summary.id,
            kind: summary.kind,
            title: summary.title,
            icon_path: summary.icon_path,
            last_message: summary.last_message,
            unread_count: summary.unread_count,
            last_read_message_id: summary.last_read_message_id,
            pinned: summary.pinned,
            muted_until: summary.muted_until,
            archived: summary.archived,
            activity_at,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}

/// Identity of one server-side mutation as seen through its delta.
type DeltaKey = (i64, DeltaCause, Option<i64>, DateTime<Utc>);

/// Ordered conversation list of one user.
#[derive(Debug, Default)]
pub struct ConversationList {
    entries: Vec<ConversationEntry>,
    seen: HashSet<DeltaKey>,
}

impl ConversationList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list with a fresh listing from the server.
    pub fn hydrate(&mut self, summaries: Vec<ConversationSummary>) {
        self.entries = summaries.into_iter().map(Into::into).collect();
        self.seen.clear();
        self.sort();
    }

    /// Entries, most recent activity first.
    #[must_use]
    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, conversation_id: i64) -> Option<&ConversationEntry> {
        self.entries.iter().find(|e| e.id == conversation_id)
    }

    /// Sum of unread counts over non-archived conversations.
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| !e.archived)
            .map(|e| e.unread_count)
            .sum()
    }

    /// Fold one delta into the list. Returns false for a redelivered delta.
    ///
    /// The server bumps the conversation's `updated_at` on every mutation, so
    /// `(conversation, cause, message, updated_at)` identifies one mutation and
    /// its unread delta is counted once. Display fields only move forward in
    /// `updated_at`, and the conversation moves to the head of the list.
    pub fn apply_delta(&mut self, delta: &ConversationListDelta) -> bool {
        let key = (
            delta.conversation_id,
            delta.cause,
            delta.message_id,
            delta.updated_at,
        );
        if !self.seen.insert(key) {
            trace!(conversation_id = delta.conversation_id, cause = ?delta.cause, "Duplicate delta");
            return false;
        }

        match self.entries.iter_mut().find(|e| e.id == delta.conversation_id) {
            Some(entry) => {
                if delta.updated_at >= entry.updated_at {
                    entry.title.clone_from(&delta.title);
                    entry.icon_path.clone_from(&delta.icon_path);
                    entry.last_message.clone_from(&delta.last_message);
                    entry.updated_at = delta.updated_at;
                }
                entry.activity_at = entry.activity_at.max(delta.updated_at);
                entry.unread_count = add_clamped(entry.unread_count, delta.unread_delta);
            }
            None => self.entries.push(ConversationEntry::from_delta(delta)),
        }

        self.sort();
        true
    }

    /// Reflect a message the local user just sent, without touching unread.
    pub fn record_own_message(&mut self, conversation_id: i64, preview: LastMessagePreview) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == conversation_id) {
            let newer = entry
                .last_message
                .as_ref()
                .is_none_or(|m| (m.created_at, m.id) <= (preview.created_at, preview.id));
            if newer {
                entry.last_read_message_id = Some(preview.id);
                entry.updated_at = entry.updated_at.max(preview.created_at);
                entry.activity_at = entry.activity_at.max(preview.created_at);
                entry.last_message = Some(preview);
                entry.unread_count = 0;
            }
        }
        self.sort();
    }

    /// The local user read up to `message_id`. Unread is cleared only when the
    /// cursor reaches the last message.
    pub fn mark_read_local(&mut self, conversation_id: i64, message_id: i64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == conversation_id) {
            if entry.last_read_message_id.is_some_and(|c| c >= message_id) {
                return;
            }
            entry.last_read_message_id = Some(message_id);
            if entry.last_message.as_ref().is_none_or(|m| m.id <= message_id) {
                entry.unread_count = 0;
            }
        }
    }

    /// Apply server-side unread after a mark-read call.
    pub fn set_unread(&mut self, conversation_id: i64, unread_count: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == conversation_id) {
            entry.unread_count = unread_count;
        }
    }

    /// Update title and icon from a conversation snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &ConversationSnapshot) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == snapshot.id) {
            if snapshot.updated_at >= entry.updated_at {
                entry.title.clone_from(&snapshot.title);
                entry.icon_path.clone_from(&snapshot.icon_path);
                entry.updated_at = snapshot.updated_at;
            }
        }
    }

    /// Drop a conversation the user left. A later invitation re-adds it.
    pub fn remove(&mut self, conversation_id: i64) {
        self.entries.retain(|e| e.id != conversation_id);
        self.seen.retain(|&(id, ..)| id != conversation_id);
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| (b.activity_at, b.id).cmp(&(a.activity_at, a.id)));
    }
}

fn add_clamped(count: u64, delta: i32) -> u64 {
    if delta >= 0 {
        count.saturating_add(u64::from(delta.unsigned_abs()))
    } else {
        count.saturating_sub(u64::from(delta.unsigned_abs()))
    }
}
