//! Routes realtime envelopes into the conversation list and open threads.

use std::collections::HashMap;

use atrium_common::{
    Channel, ConversationSummary, Envelope, MessagePage, MessagePayload, RealtimeEvent,
    events::LastMessagePreview,
};
use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use crate::{list::ConversationList, thread::ThreadView};

/// What an envelope changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Nothing,
    List,
    Thread,
    Both,
}

impl Applied {
    const fn from_flags(list: bool, thread: bool) -> Self {
        match (list, thread) {
            (false, false) => Self::Nothing,
            (true, false) => Self::List,
            (false, true) => Self::Thread,
            (true, true) => Self::Both,
        }
    }
}

/// Client state of one signed-in user.
#[derive(Debug)]
pub struct Reconciler {
    user_id: i64,
    list: ConversationList,
    threads: HashMap<i64, ThreadView>,
    typing_timeout: Duration,
}

impl Reconciler {
    #[must_use]
    pub fn new(user_id: i64, typing_timeout: Duration) -> Self {
        Self {
            user_id,
            list: ConversationList::new(),
            threads: HashMap::new(),
            typing_timeout,
        }
    }

    #[must_use]
    pub const fn list(&self) -> &ConversationList {
        &self.list
    }

    #[must_use]
    pub fn thread(&self, conversation_id: i64) -> Option<&ThreadView> {
        self.threads.get(&conversation_id)
    }

    pub fn thread_mut(&mut self, conversation_id: i64) -> Option<&mut ThreadView> {
        self.threads.get_mut(&conversation_id)
    }

    /// Load the conversation list, e.g. on start or after reconnecting.
    pub fn hydrate_list(&mut self, summaries: Vec<ConversationSummary>) {
        self.list.hydrate(summaries);
    }

    /// Open a thread with its first page of history.
    pub fn open_thread(&mut self, conversation_id: i64, first_page: MessagePage) -> &ThreadView {
        let thread = self
            .threads
            .entry(conversation_id)
            .or_insert_with(|| ThreadView::new(conversation_id, self.user_id, self.typing_timeout));
        thread.load_page(first_page);
        thread
    }

    pub fn close_thread(&mut self, conversation_id: i64) {
        self.threads.remove(&conversation_id);
    }

    /// Record the server's response to one of the local user's own sends.
    ///
    /// The sender gets no list delta for their own messages, so the list is
    /// updated here.
    pub fn record_own_message(&mut self, message: &MessagePayload, preview: LastMessagePreview) {
        if let Some(thread) = self.threads.get_mut(&message.conversation_id) {
            thread.apply_sent(message.clone());
        }
        self.list.record_own_message(message.conversation_id, preview);
    }

    /// Fold one envelope into local state.
    pub fn apply(&mut self, envelope: &Envelope, now: DateTime<Utc>) -> Applied {
        match envelope.channel {
            Channel::User(user_id) if user_id != self.user_id => {
                trace!(user_id, "Ignoring envelope for another user");
                Applied::Nothing
            }
            Channel::User(_) => self.apply_private(&envelope.event),
            Channel::Conversation(conversation_id) => {
                if envelope.event.conversation_id() != conversation_id {
                    trace!(conversation_id, "Ignoring envelope with mismatched conversation");
                    return Applied::Nothing;
                }
                self.apply_conversation(conversation_id, &envelope.event, now)
            }
        }
    }

    fn apply_private(&mut self, event: &RealtimeEvent) -> Applied {
        match event {
            RealtimeEvent::ConversationListDelta(delta) => {
                Applied::from_flags(self.list.apply_delta(delta), false)
            }
            RealtimeEvent::ConversationUpdated(snapshot) => {
                self.list.apply_snapshot(snapshot);
                Applied::List
            }
            _ => Applied::Nothing,
        }
    }

    fn apply_conversation(
        &mut self,
        conversation_id: i64,
        event: &RealtimeEvent,
        now: DateTime<Utc>,
    ) -> Applied {
        let user_id = self.user_id;

        if let RealtimeEvent::ConversationUpdated(snapshot) = event {
            let still_member = snapshot.participants.iter().any(|p| p.user.id == user_id);
            if still_member {
                self.list.apply_snapshot(snapshot);
            } else {
                self.list.remove(conversation_id);
                self.threads.remove(&conversation_id);
            }
            return Applied::Both;
        }

        let mut list_changed = false;
        if let RealtimeEvent::ReadAdvanced(read) = event {
            if read.user_id == user_id {
                self.list.mark_read_local(conversation_id, read.last_read_message_id);
                list_changed = true;
            }
        }

        let Some(thread) = self.threads.get_mut(&conversation_id) else {
            return Applied::from_flags(list_changed, false);
        };

        let thread_changed = match event {
            RealtimeEvent::MessageSent(message) => thread.apply_sent(message.clone()),
            RealtimeEvent::MessageEdited(edit) => thread.apply_edited(edit),
            RealtimeEvent::MessageDeleted(deleted) => thread.apply_deleted(deleted),
            RealtimeEvent::ReadAdvanced(read) => thread.apply_read(read),
            RealtimeEvent::TypingChanged(typing) => thread.apply_typing(typing, now),
            RealtimeEvent::ConversationListDelta(_) | RealtimeEvent::ConversationUpdated(_) => {
                false
            }
        };

        Applied::from_flags(list_changed, thread_changed)
    }
}
