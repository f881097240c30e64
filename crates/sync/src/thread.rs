//! Thread view: the messages of one open conversation.
//!
//! Messages are keyed by `(created_at, id)`, the same order the server pages
//! in, so history pages and live events merge without re-sorting.

use std::collections::{BTreeMap, HashMap, HashSet};

use atrium_common::{
    MessagePage, MessagePayload,
    events::{MessageDeletedPayload, MessageEditedPayload, ReadAdvancedPayload, TypingPayload},
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

type MessageKey = (DateTime<Utc>, i64);

/// Delivery state of a message the local user is sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PendingState {
    Sending,
    Failed,
}

/// Optimistic placeholder shown until the server echoes the message back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMessage {
    pub client_id: String,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub state: PendingState,
}

#[derive(Debug)]
pub struct ThreadView {
    conversation_id: i64,
    user_id: i64,
    messages: BTreeMap<MessageKey, MessagePayload>,
    keys: HashMap<i64, MessageKey>,
    pending: Vec<PendingMessage>,
    /// Edits that arrived before their message, newest per message id.
    early_edits: HashMap<i64, MessageEditedPayload>,
    tombstones: HashSet<i64>,
    hidden: HashSet<i64>,
    read_cursors: HashMap<i64, i64>,
    typing: HashMap<i64, DateTime<Utc>>,
    typing_timeout: Duration,
    next_before: Option<i64>,
    history_loaded: bool,
}

impl ThreadView {
    #[must_use]
    pub fn new(conversation_id: i64, user_id: i64, typing_timeout: Duration) -> Self {
        Self {
            conversation_id,
            user_id,
            messages: BTreeMap::new(),
            keys: HashMap::new(),
            pending: Vec::new(),
            early_edits: HashMap::new(),
            tombstones: HashSet::new(),
            hidden: HashSet::new(),
            read_cursors: HashMap::new(),
            typing: HashMap::new(),
            typing_timeout,
            next_before: None,
            history_loaded: false,
        }
    }

    #[must_use]
    pub const fn conversation_id(&self) -> i64 {
        self.conversation_id
    }

    /// Messages oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &MessagePayload> {
        self.messages.values()
    }

    #[must_use]
    pub fn get(&self, message_id: i64) -> Option<&MessagePayload> {
        self.keys.get(&message_id).and_then(|k| self.messages.get(k))
    }

    #[must_use]
    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    /// Newest message id, if any.
    #[must_use]
    pub fn last_message_id(&self) -> Option<i64> {
        self.messages.keys().next_back().map(|(_, id)| *id)
    }

    /// Cursor to request the next older page with, or `None` once history is exhausted.
    #[must_use]
    pub const fn next_before(&self) -> Option<i64> {
        self.next_before
    }

    #[must_use]
    pub const fn has_more_history(&self) -> bool {
        !self.history_loaded || self.next_before.is_some()
    }

    /// Read cursor of another participant.
    #[must_use]
    pub fn read_cursor(&self, user_id: i64) -> Option<i64> {
        self.read_cursors.get(&user_id).copied()
    }

    /// Users who have read at least up to `message_id`.
    #[must_use]
    pub fn read_by(&self, message_id: i64) -> Vec<i64> {
        let mut users: Vec<i64> = self
            .read_cursors
            .iter()
            .filter(|&(&user, &cursor)| user != self.user_id && cursor >= message_id)
            .map(|(&user, _)| user)
            .collect();
        users.sort_unstable();
        users
    }

    /// Merge an older page fetched with [`ThreadView::next_before`].
    pub fn load_page(&mut self, page: MessagePage) {
        for message in page.messages {
            self.insert(message);
        }
        self.next_before = page.next_before;
        self.history_loaded = true;
    }

    /// Show a message before the server confirmed it.
    pub fn add_pending(&mut self, client_id: String, body: Option<String>, now: DateTime<Utc>) {
        if self.pending.iter().any(|p| p.client_id == client_id) {
            return;
        }
        self.pending.push(PendingMessage {
            client_id,
            body,
            created_at: now,
            state: PendingState::Sending,
        });
    }

    /// Mark an optimistic message as failed so the user can retry it.
    pub fn fail_pending(&mut self, client_id: &str) {
        if let Some(pending) = self.pending.iter_mut().find(|p| p.client_id == client_id) {
            pending.state = PendingState::Failed;
        }
    }

    /// A `MessageSent` event or the response to one's own send. Returns true
    /// when the message was not shown before.
    pub fn apply_sent(&mut self, message: MessagePayload) -> bool {
        if let Some(client_id) = message.client_id.as_deref() {
            if message.sender_id == self.user_id {
                self.pending.retain(|p| p.client_id != client_id);
            }
        }
        self.typing.remove(&message.sender_id);
        self.insert(message)
    }

    /// Apply an edit unless the shown version is already as new.
    ///
    /// An edit for a message not shown yet is kept and folded in when the
    /// message arrives.
    pub fn apply_edited(&mut self, edit: &MessageEditedPayload) -> bool {
        if edit.conversation_id != self.conversation_id {
            return false;
        }
        if let Some(message) = self
            .keys
            .get(&edit.message_id)
            .and_then(|k| self.messages.get_mut(k))
        {
            return fold_edit(message, edit);
        }
        if self.tombstones.contains(&edit.message_id) || self.hidden.contains(&edit.message_id) {
            return false;
        }

        let newest = self
            .early_edits
            .get(&edit.message_id)
            .is_none_or(|held| held.edited_at < edit.edited_at);
        if newest {
            debug!(message_id = edit.message_id, "Holding edit for a message not seen yet");
            self.early_edits.insert(edit.message_id, edit.clone());
        }
        false
    }

    /// Remove a message deleted for everyone. It will not come back even if
    /// its `MessageSent` arrives later.
    pub fn apply_deleted(&mut self, deleted: &MessageDeletedPayload) -> bool {
        self.tombstones.insert(deleted.message_id);
        self.early_edits.remove(&deleted.message_id);
        self.remove(deleted.message_id)
    }

    /// Hide a message locally after deleting it for oneself.
    pub fn hide(&mut self, message_id: i64) -> bool {
        self.hidden.insert(message_id);
        self.remove(message_id)
    }

    /// Read cursors only move forward.
    pub fn apply_read(&mut self, read: &ReadAdvancedPayload) -> bool {
        let cursor = self.read_cursors.entry(read.user_id).or_default();
        if *cursor >= read.last_read_message_id {
            return false;
        }
        *cursor = read.last_read_message_id;
        true
    }

    /// Track a typing signal. One's own signals are ignored.
    pub fn apply_typing(&mut self, typing: &TypingPayload, now: DateTime<Utc>) -> bool {
        if typing.user_id == self.user_id {
            return false;
        }
        if typing.is_typing {
            self.typing.insert(typing.user_id, now + self.typing_timeout);
            true
        } else {
            self.typing.remove(&typing.user_id).is_some()
        }
    }

    /// Users currently typing. Signals older than the timeout are dropped.
    pub fn typing_users(&mut self, now: DateTime<Utc>) -> Vec<i64> {
        self.typing.retain(|_, expires| *expires > now);
        let mut users: Vec<i64> = self.typing.keys().copied().collect();
        users.sort_unstable();
        users
    }

    fn insert(&mut self, mut message: MessagePayload) -> bool {
        if message.conversation_id != self.conversation_id {
            debug!(
                message_id = message.id,
                conversation_id = message.conversation_id,
                "Ignoring message for another conversation"
            );
            return false;
        }
        if self.tombstones.contains(&message.id) || self.hidden.contains(&message.id) {
            return false;
        }
        if let Some(key) = self.keys.get(&message.id) {
            if let Some(existing) = self.messages.get_mut(key) {
                if message.updated_at > existing.updated_at {
                    *existing = message;
                }
            }
            return false;
        }

        if let Some(edit) = self.early_edits.remove(&message.id) {
            fold_edit(&mut message, &edit);
        }
        let key = (message.created_at, message.id);
        self.keys.insert(message.id, key);
        self.messages.insert(key, message);
        true
    }

    fn remove(&mut self, message_id: i64) -> bool {
        match self.keys.remove(&message_id) {
            Some(key) => self.messages.remove(&key).is_some(),
            None => false,
        }
    }
}

fn fold_edit(message: &mut MessagePayload, edit: &MessageEditedPayload) -> bool {
    if message.edited_at.is_some_and(|at| at >= edit.edited_at) {
        return false;
    }
    message.body.clone_from(&edit.body);
    message.edited_at = Some(edit.edited_at);
    message.updated_at = message.updated_at.max(edit.edited_at);
    true
}
