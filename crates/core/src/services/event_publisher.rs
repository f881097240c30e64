//! Event publisher service.
//!
//! Provides an abstraction for publishing real-time events.
//! Implementations live in the api crate (in-process SSE hub) and the queue
//! crate (Redis Pub/Sub).

use async_trait::async_trait;
use atrium_common::{AppResult, Envelope};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Trait for publishing real-time events.
///
/// This allows the core services to publish events
/// without directly depending on the transport.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event on the channel named in the envelope.
    async fn publish(&self, envelope: &Envelope) -> AppResult<()>;
}

/// A no-op implementation of `EventPublisher` for when real-time events are disabled.
#[derive(Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish(&self, _envelope: &Envelope) -> AppResult<()> {
        Ok(())
    }
}

/// Keeps every published envelope in memory, in publish order.
#[derive(Clone, Default)]
pub struct RecordingEventPublisher {
    envelopes: Arc<Mutex<Vec<Envelope>>>,
}

impl RecordingEventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far.
    pub async fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().await.clone()
    }

    /// Forget everything published so far.
    pub async fn clear(&self) {
        self.envelopes.lock().await.clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, envelope: &Envelope) -> AppResult<()> {
        self.envelopes.lock().await.push(envelope.clone());
        Ok(())
    }
}

/// Wrapper for boxed `EventPublisher` trait object.
pub type EventPublisherService = Arc<dyn EventPublisher>;
