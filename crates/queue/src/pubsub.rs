//! Redis Pub/Sub for cross-instance event distribution.
//!
//! Every server instance publishes realtime envelopes to Redis and listens on
//! the shared prefix, so a client connected to any instance sees events
//! produced by all of them.

#![allow(missing_docs)]

use std::sync::Arc;

use async_trait::async_trait;
use atrium_common::{AppError, AppResult, Channel, Envelope};
use atrium_core::EventPublisher;
use fred::clients::{Client, SubscriberClient};
use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the local fan-out channel.
const LOCAL_CAPACITY: usize = 1000;

/// Redis Pub/Sub manager for envelope distribution.
#[derive(Clone)]
pub struct RedisPubSub {
    prefix: String,
    publisher: Client,
    subscriber: SubscriberClient,
    /// Local broadcast channel for envelopes received from Redis.
    local_tx: broadcast::Sender<Envelope>,
}

impl RedisPubSub {
    /// Connect both the publishing and the subscribing client.
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;

        let publisher = Client::new(config.clone(), None, None, None);
        publisher.init().await?;

        let subscriber = SubscriberClient::new(config, None, None, None);
        subscriber.init().await?;

        let (local_tx, _) = broadcast::channel(LOCAL_CAPACITY);

        info!(prefix, "Redis Pub/Sub initialized");

        Ok(Self {
            prefix: prefix.to_string(),
            publisher,
            subscriber,
            local_tx,
        })
    }

    /// Redis channel an envelope for `channel` is published on.
    #[must_use]
    pub fn channel_name(&self, channel: &Channel) -> String {
        redis_channel(&self.prefix, channel)
    }

    /// Subscribe to every channel under the prefix and start the receive loop.
    pub async fn start(&self) -> Result<(), RedisError> {
        let pattern = format!("{}:*", self.prefix);
        self.subscriber.psubscribe(pattern.as_str()).await?;

        info!(pattern, "Subscribed to Redis Pub/Sub channels");

        let local_tx = self.local_tx.clone();
        let mut message_stream = self.subscriber.message_rx();

        tokio::spawn(async move {
            while let Ok(message) = message_stream.recv().await {
                let Some(payload) = message.value.as_string() else {
                    continue;
                };
                match decode_envelope(&payload) {
                    Ok(envelope) => {
                        debug!(channel = %envelope.channel, "Received Pub/Sub envelope");
                        if local_tx.send(envelope).is_err() {
                            debug!("No local subscribers for Pub/Sub envelope");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to parse Pub/Sub message");
                    }
                }
            }
            info!("Pub/Sub message stream ended");
        });

        Ok(())
    }

    /// Publish one envelope to Redis.
    pub async fn publish_envelope(&self, envelope: &Envelope) -> Result<(), RedisError> {
        let payload = serde_json::to_string(envelope).map_err(|e| {
            RedisError::new(
                RedisErrorKind::InvalidArgument,
                format!("Serialization error: {e}"),
            )
        })?;
        let channel = self.channel_name(&envelope.channel);
        let _: () = self.publisher.publish(channel.as_str(), payload).await?;
        debug!(channel, "Published Pub/Sub envelope");
        Ok(())
    }

    /// Get a receiver for envelopes arriving from Redis.
    #[must_use]
    pub fn subscribe_local(&self) -> broadcast::Receiver<Envelope> {
        self.local_tx.subscribe()
    }

    #[must_use]
    pub fn local_subscriber_count(&self) -> usize {
        self.local_tx.receiver_count()
    }

    /// Shutdown the Pub/Sub manager.
    pub async fn shutdown(&self) -> Result<(), RedisError> {
        self.subscriber.quit().await?;
        self.publisher.quit().await?;
        info!("Redis Pub/Sub shutdown");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisPubSub {
    async fn publish(&self, envelope: &Envelope) -> AppResult<()> {
        self.publish_envelope(envelope)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }
}

fn redis_channel(prefix: &str, channel: &Channel) -> String {
    format!("{prefix}:{}", channel.name())
}

fn decode_envelope(payload: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Bridge between Redis Pub/Sub and the in-process SSE hub.
pub struct PubSubSseBridge {
    pubsub: Arc<RedisPubSub>,
}

impl PubSubSseBridge {
    #[must_use]
    pub const fn new(pubsub: Arc<RedisPubSub>) -> Self {
        Self { pubsub }
    }

    /// Start forwarding envelopes received from Redis to `on_event`.
    pub fn start<F>(&self, on_event: F)
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        let mut rx = self.pubsub.subscribe_local();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => on_event(envelope),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "SSE bridge lagged behind Redis");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("SSE bridge channel closed");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use atrium_common::RealtimeEvent;
    use atrium_common::events::TypingPayload;

    #[test]
    fn test_channel_names() {
        assert_eq!(
            redis_channel("atrium", &Channel::Conversation(12)),
            "atrium:conversation.12"
        );
        assert_eq!(redis_channel("staging", &Channel::User(3)), "staging:user.3");
    }

    #[test]
    fn test_payload_decoding() {
        let envelope = Envelope::new(
            Channel::Conversation(4),
            RealtimeEvent::TypingChanged(TypingPayload {
                conversation_id: 4,
                user_id: 9,
                is_typing: false,
            }),
        );
        let payload = serde_json::to_string(&envelope).unwrap();

        assert_eq!(decode_envelope(&payload).unwrap(), envelope);
        assert!(decode_envelope("{\"type\":\"noteCreated\"}").is_err());
    }
}
