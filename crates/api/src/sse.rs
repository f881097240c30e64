//! Server-Sent Events (SSE) for realtime updates.
//!
//! [`RealtimeHub`] keeps one broadcast channel per [`Channel`] that currently
//! has listeners. Core services publish into it directly, or through Redis when
//! several instances share the load.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atrium_common::{AppError, AppResult, Channel, Envelope};
use atrium_core::EventPublisher;
use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::{extractors::AuthUser, middleware::AppState};

/// Buffered events per channel before slow listeners start lagging.
const CHANNEL_CAPACITY: usize = 256;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// First event on every stream.
#[derive(Debug, Serialize)]
struct Connected {
    channel: Channel,
}

/// In-process fan-out of envelopes to SSE listeners.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    channels: Arc<RwLock<HashMap<Channel, broadcast::Sender<Envelope>>>>,
}

impl RealtimeHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on a channel, creating it if nobody listens yet.
    pub async fn subscribe(&self, channel: Channel) -> broadcast::Receiver<Envelope> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Hand an envelope to the listeners of its channel. Returns how many got it.
    pub async fn deliver(&self, envelope: &Envelope) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(&envelope.channel)
            .and_then(|sender| sender.send(envelope.clone()).ok())
            .unwrap_or(0)
    }

    /// Number of listeners on a channel.
    pub async fn listener_count(&self, channel: Channel) -> usize {
        self.channels
            .read()
            .await
            .get(&channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop channels whose listeners all disconnected.
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[async_trait]
impl EventPublisher for RealtimeHub {
    async fn publish(&self, envelope: &Envelope) -> AppResult<()> {
        let delivered = self.deliver(envelope).await;
        debug!(channel = %envelope.channel, delivered, "Delivered realtime event");
        Ok(())
    }
}

fn event_stream(
    channel: Channel,
    rx: broadcast::Receiver<Envelope>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(envelope) => Some(Ok(Event::default()
            .event(envelope.event.name())
            .json_data(&envelope)
            .unwrap_or_else(|_| Event::default().data("error")))),
        Err(e) => {
            warn!(%channel, error = %e, "SSE listener lagged");
            None
        }
    });

    let initial = stream::once(async move {
        Ok(Event::default()
            .event("connected")
            .json_data(Connected { channel })
            .unwrap_or_else(|_| Event::default().data("connected")))
    });

    Sse::new(initial.chain(stream)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping"))
}

/// The caller's private channel: list deltas and invitations.
async fn user_stream(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let channel = Channel::User(user.id);
    let rx = state.realtime.subscribe(channel).await;
    debug!(user_id = user.id, "User stream opened");
    event_stream(channel, rx)
}

/// Thread events of one conversation. Participants only.
async fn conversation_stream(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    state
        .conversation_service
        .get_for_user(conversation_id, user.id)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => {
                AppError::Forbidden(format!("Not a participant of conversation {conversation_id}"))
            }
            other => other,
        })?;

    let channel = Channel::Conversation(conversation_id);
    let rx = state.realtime.subscribe(channel).await;
    debug!(user_id = user.id, conversation_id, "Conversation stream opened");
    Ok(event_stream(channel, rx))
}

/// Create SSE router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user", get(user_stream))
        .route("/conversations/{conversation_id}", get(conversation_stream))
}
