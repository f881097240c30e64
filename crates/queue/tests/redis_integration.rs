//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` environment variable to point to your Redis instance.
//! Default: <redis://localhost:6379>

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use atrium_common::events::{ReadAdvancedPayload, TypingPayload};
use atrium_common::{Channel, Envelope, RealtimeEvent};
use atrium_core::EventPublisher;
use atrium_queue::{PubSubSseBridge, RedisPubSub};
use tokio::sync::mpsc;

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn typing(conversation_id: i64) -> Envelope {
    Envelope::new(
        Channel::Conversation(conversation_id),
        RealtimeEvent::TypingChanged(TypingPayload {
            conversation_id,
            user_id: 1,
            is_typing: true,
        }),
    )
}

/// Test that we can connect to Redis.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_connection() {
    let pubsub = RedisPubSub::new(&get_redis_url(), "atrium-test").await;
    assert!(pubsub.is_ok(), "Failed to connect to Redis: {:?}", pubsub.err());
}

/// Envelopes published by one instance reach the local subscribers of another.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_envelope_crosses_instances() {
    let url = get_redis_url();
    let sender = RedisPubSub::new(&url, "atrium-cross").await.expect("Failed to connect to Redis");
    let receiver = RedisPubSub::new(&url, "atrium-cross").await.expect("Failed to connect to Redis");
    receiver.start().await.expect("Failed to subscribe");

    let mut rx = receiver.subscribe_local();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let envelope = typing(42);
    EventPublisher::publish(&sender, &envelope).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for envelope")
        .unwrap();
    assert_eq!(received, envelope);

    sender.shutdown().await.expect("Failed to shutdown");
    receiver.shutdown().await.expect("Failed to shutdown");
}

/// Instances with different prefixes do not see each other.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_prefixes_are_isolated() {
    let url = get_redis_url();
    let other = RedisPubSub::new(&url, "atrium-other").await.unwrap();
    let receiver = RedisPubSub::new(&url, "atrium-mine").await.unwrap();
    receiver.start().await.unwrap();

    let mut rx = receiver.subscribe_local();
    tokio::time::sleep(Duration::from_millis(100)).await;

    other.publish_envelope(&typing(1)).await.unwrap();

    let result = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(result.is_err(), "received an envelope from another prefix");

    other.shutdown().await.unwrap();
    receiver.shutdown().await.unwrap();
}

/// The bridge hands every received envelope to its callback.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_bridge_forwards_envelopes() {
    let url = get_redis_url();
    let pubsub = Arc::new(RedisPubSub::new(&url, "atrium-bridge").await.unwrap());
    pubsub.start().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    PubSubSseBridge::new(pubsub.clone()).start(move |envelope| {
        let _ = tx.send(envelope);
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let read = Envelope::new(
        Channel::Conversation(5),
        RealtimeEvent::ReadAdvanced(ReadAdvancedPayload {
            conversation_id: 5,
            user_id: 2,
            last_read_message_id: 77,
        }),
    );
    pubsub.publish_envelope(&read).await.unwrap();

    let forwarded = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forwarded, read);

    pubsub.shutdown().await.unwrap();
}

/// Test local subscriber count.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_local_subscriber_count() {
    let pubsub = RedisPubSub::new(&get_redis_url(), "atrium-test").await.unwrap();

    assert_eq!(pubsub.local_subscriber_count(), 0);
    let _rx1 = pubsub.subscribe_local();
    let _rx2 = pubsub.subscribe_local();
    assert_eq!(pubsub.local_subscriber_count(), 2);

    pubsub.shutdown().await.unwrap();
}
