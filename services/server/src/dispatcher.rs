use crate::model::OwnerId;
use crate::registry::SubscriptionRegistry;
use std::sync::Arc;
use tracing::debug;
use wt_protocol::{CapturedEvent, StreamMessage};

/// Pushes messages to every live subscriber of an owner.
///
/// Delivery is best effort: with no subscribers a call is a no-op, and a
/// subscriber whose receiver is gone is dropped without affecting the rest.
#[derive(Clone)]
pub struct StreamDispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl StreamDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Returns how many subscribers received the message.
    pub fn notify(&self, owner_id: OwnerId, message: StreamMessage) -> usize {
        let kind = message.kind();
        let delivered = self
            .registry
            .for_each(owner_id, |subscriber| subscriber.send(message.clone()));
        debug!(owner_id, kind, delivered, "dispatched");
        delivered
    }

    /// Fan out a freshly stored event as `new_webhook` then `new_notification`.
    ///
    /// Both messages go to each subscriber inside one registry visit, so a
    /// subscriber never sees another event interleaved between the pair.
    pub fn notify_captured(&self, event: &CapturedEvent) -> usize {
        let owner_id = event.owner_id;
        let delivered = self.registry.for_each(owner_id, |subscriber| {
            subscriber.send(StreamMessage::NewWebhook {
                webhook_id: event.webhook_id.clone(),
                data: event.clone(),
            }) && subscriber.send(StreamMessage::NewNotification {
                webhook_id: event.webhook_id.clone(),
                data: event.clone(),
            })
        });
        debug!(
            owner_id,
            webhook_id = %event.webhook_id,
            request_id = event.id,
            delivered,
            "dispatched capture"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use wt_protocol::BodyKind;

    fn event(owner_id: OwnerId) -> CapturedEvent {
        CapturedEvent {
            id: 11,
            owner_id,
            webhook_id: "orders".to_owned(),
            method: "POST".to_owned(),
            headers: BTreeMap::new(),
            body_kind: BodyKind::Json,
            body: serde_json::json!({ "x": 1 }),
            query_params: BTreeMap::new(),
            timestamp: Utc::now(),
            client_ip: None,
            is_read: false,
        }
    }

    #[test]
    fn notify_without_subscribers_is_a_no_op() {
        let dispatcher = StreamDispatcher::new(Arc::new(SubscriptionRegistry::new()));
        assert_eq!(
            dispatcher.notify(5, StreamMessage::NotificationsCleared { count: 0 }),
            0
        );
    }

    #[tokio::test]
    async fn captured_event_reaches_every_subscriber_as_a_pair() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = StreamDispatcher::new(Arc::clone(&registry));
        let mut first = registry.subscribe(1);
        let mut second = registry.subscribe(1);
        let mut stranger = registry.subscribe(2);

        assert_eq!(dispatcher.notify_captured(&event(1)), 2);

        for sub in [&mut first, &mut second] {
            let msg = sub.recv().await.unwrap();
            assert_eq!(msg.kind(), "new_webhook");
            let msg = sub.recv().await.unwrap();
            assert_eq!(msg.kind(), "new_notification");
        }
        drop(first);
        assert_eq!(dispatcher.notify_captured(&event(1)), 1);
        assert_eq!(
            tokio::time::timeout(std::time::Duration::from_millis(20), stranger.recv())
                .await
                .ok(),
            None
        );
    }
}
