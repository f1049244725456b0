//! `GET /events/{owner}`: the live stream.
//!
//! Connecting emits `connected` once the subscriber is registered, then
//! every dispatched message in order, with a `heartbeat` after each idle
//! period.  Dropping the stream (client gone) drops the subscription, which
//! unregisters it.

use super::response::{forbidden, HttpResult};
use crate::auth::Principal;
use crate::model::OwnerId;
use crate::registry::Subscription;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderName, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures_util::stream::{self, Stream, StreamExt};
use std::time::Duration;
use tracing::{info, warn};
use wt_protocol::StreamMessage;

enum Phase {
    Connecting(Subscription),
    Streaming(Subscription),
}

/// Messages for one subscriber.  Ends when the registry drops it.
pub fn live_messages(
    subscription: Subscription,
    idle: Duration,
) -> impl Stream<Item = StreamMessage> + Send {
    stream::unfold(Phase::Connecting(subscription), move |phase| async move {
        match phase {
            Phase::Connecting(sub) => Some((StreamMessage::Connected, Phase::Streaming(sub))),
            Phase::Streaming(mut sub) => match tokio::time::timeout(idle, sub.recv()).await {
                Ok(Some(message)) => Some((message, Phase::Streaming(sub))),
                Ok(None) => {
                    info!(owner_id = sub.owner_id(), subscriber_id = sub.id(), "live stream closed");
                    None
                }
                Err(_) => Some((StreamMessage::Heartbeat, Phase::Streaming(sub))),
            },
        }
    })
}

pub async fn live_stream(
    State(state): State<AppState>,
    Principal(caller): Principal,
    Path(owner_id): Path<OwnerId>,
) -> HttpResult<Response> {
    if caller != owner_id {
        warn!(caller, owner_id, "live stream owner mismatch");
        return Err(forbidden("cannot stream another owner's events"));
    }

    let subscription = state.registry.subscribe(owner_id);
    info!(owner_id, subscriber_id = subscription.id(), "live stream opened");
    let events = live_messages(subscription, state.heartbeat_idle)
        .map(|message| Event::default().json_data(message));

    Ok((
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(events),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::StreamDispatcher;
    use crate::registry::SubscriptionRegistry;
    use std::sync::Arc;
    use tokio::time::Instant;

    const IDLE: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn connected_first_then_heartbeat_after_idle() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut messages = Box::pin(live_messages(registry.subscribe(1), IDLE));
        let start = Instant::now();

        assert_eq!(messages.next().await, Some(StreamMessage::Connected));
        assert_eq!(messages.next().await, Some(StreamMessage::Heartbeat));
        assert_eq!(start.elapsed(), IDLE);
        assert_eq!(messages.next().await, Some(StreamMessage::Heartbeat));
        assert_eq!(start.elapsed(), IDLE * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn event_restarts_the_idle_window() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = StreamDispatcher::new(Arc::clone(&registry));
        let mut messages = Box::pin(live_messages(registry.subscribe(1), IDLE));
        let start = Instant::now();
        assert_eq!(messages.next().await, Some(StreamMessage::Connected));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            dispatcher.notify(1, StreamMessage::NotificationsCleared { count: 0 });
        });

        assert_eq!(
            messages.next().await,
            Some(StreamMessage::NotificationsCleared { count: 0 })
        );
        assert_eq!(start.elapsed(), Duration::from_secs(20));
        assert_eq!(messages.next().await, Some(StreamMessage::Heartbeat));
        assert_eq!(start.elapsed(), Duration::from_secs(50));
    }

    #[tokio::test]
    async fn dropping_the_stream_unregisters() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let messages = live_messages(registry.subscribe(4), IDLE);
        assert_eq!(registry.subscriber_count(4), 1);
        drop(messages);
        assert_eq!(registry.subscriber_count(4), 0);
    }

    #[tokio::test]
    async fn closing_the_registry_ends_the_stream() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut messages = Box::pin(live_messages(registry.subscribe(9), IDLE));
        assert_eq!(messages.next().await, Some(StreamMessage::Connected));
        registry.close_all();
        assert_eq!(messages.next().await, None);
    }
}
