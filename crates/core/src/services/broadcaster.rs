//! Event broadcaster.
//!
//! Publishing happens after the database transaction committed. A failed
//! publish is logged and dropped; it never surfaces to the caller.

use std::sync::Arc;

use atrium_common::{Channel, Envelope, RealtimeEvent};
use tracing::{debug, warn};

use crate::services::event_publisher::{EventPublisherService, NoOpEventPublisher};

#[derive(Clone)]
pub struct EventBroadcaster {
    publisher: EventPublisherService,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEventPublisher))
    }
}

impl EventBroadcaster {
    #[must_use]
    pub fn new(publisher: EventPublisherService) -> Self {
        Self { publisher }
    }

    /// Publish one event on one channel.
    pub async fn publish(&self, channel: Channel, event: RealtimeEvent) {
        let envelope = Envelope::new(channel, event);
        match self.publisher.publish(&envelope).await {
            Ok(()) => {
                debug!(channel = %channel, event = envelope.event.name(), "Published realtime event");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    channel = %channel,
                    event = envelope.event.name(),
                    "Failed to publish realtime event"
                );
            }
        }
    }

    /// Publish on a conversation channel.
    pub async fn to_conversation(&self, conversation_id: i64, event: RealtimeEvent) {
        self.publish(Channel::Conversation(conversation_id), event)
            .await;
    }

    /// Publish the same event on several user channels.
    pub async fn to_users<I>(&self, user_ids: I, event: &RealtimeEvent)
    where
        I: IntoIterator<Item = i64>,
    {
        for user_id in user_ids {
            self.publish(Channel::User(user_id), event.clone()).await;
        }
    }
}
