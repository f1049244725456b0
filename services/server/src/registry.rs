//! Live-stream subscriptions, keyed by owner.
//!
//! Owners are spread over a fixed number of shards, each behind its own
//! mutex, so traffic for unrelated owners never contends on one lock.  Every
//! mutation of an owner's subscriber set (including pruning an empty set)
//! happens under that owner's shard lock.

use crate::model::OwnerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;
use wt_protocol::StreamMessage;

const SHARD_COUNT: usize = 16;

pub type SubscriberId = u64;
pub type MessageSender = mpsc::UnboundedSender<StreamMessage>;

/// One registered live-stream connection.
pub struct Subscriber {
    pub id: SubscriberId,
    pub owner_id: OwnerId,
    pub created_at: Instant,
    tx: MessageSender,
}

impl Subscriber {
    /// Returns `false` once the receiving side is gone.
    pub fn send(&self, message: StreamMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

type Shard = HashMap<OwnerId, HashMap<SubscriberId, Subscriber>>;

pub struct SubscriptionRegistry {
    shards: Vec<Mutex<Shard>>,
    next_id: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            next_id: AtomicU64::new(1),
        }
    }

    fn shard(&self, owner_id: OwnerId) -> &Mutex<Shard> {
        let idx = owner_id.unsigned_abs() as usize % self.shards.len();
        &self.shards[idx]
    }

    pub fn register(&self, owner_id: OwnerId, tx: MessageSender) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut shard = self.shard(owner_id).lock();
        let subscribers = shard.entry(owner_id).or_default();
        subscribers.insert(
            id,
            Subscriber {
                id,
                owner_id,
                created_at: Instant::now(),
                tx,
            },
        );
        debug!(owner_id, subscriber_id = id, live = subscribers.len(), "subscriber registered");
        id
    }

    /// Remove a subscriber.  Calling it again for the same id is a no-op.
    pub fn unregister(&self, owner_id: OwnerId, id: SubscriberId) -> bool {
        let mut shard = self.shard(owner_id).lock();
        let Some(subscribers) = shard.get_mut(&owner_id) else {
            return false;
        };
        let removed = subscribers.remove(&id).is_some();
        if subscribers.is_empty() {
            shard.remove(&owner_id);
        }
        if removed {
            debug!(owner_id, subscriber_id = id, "subscriber unregistered");
        }
        removed
    }

    /// Visit every subscriber of `owner_id` under the shard lock.
    ///
    /// Subscribers for which `f` returns `false` are unregistered in the same
    /// critical section.  Returns how many subscribers were kept.
    pub fn for_each<F>(&self, owner_id: OwnerId, mut f: F) -> usize
    where
        F: FnMut(&Subscriber) -> bool,
    {
        let mut shard = self.shard(owner_id).lock();
        let Some(subscribers) = shard.get_mut(&owner_id) else {
            return 0;
        };
        subscribers.retain(|id, subscriber| {
            let keep = f(subscriber);
            if !keep {
                debug!(owner_id, subscriber_id = *id, "dropping closed subscriber");
            }
            keep
        });
        let kept = subscribers.len();
        if kept == 0 {
            shard.remove(&owner_id);
        }
        kept
    }

    /// Register a fresh channel and return a guard that unregisters on drop.
    pub fn subscribe(self: &Arc<Self>, owner_id: OwnerId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(owner_id, tx);
        Subscription {
            registry: Arc::clone(self),
            owner_id,
            id,
            rx,
        }
    }

    pub fn subscriber_count(&self, owner_id: OwnerId) -> usize {
        self.shard(owner_id)
            .lock()
            .get(&owner_id)
            .map_or(0, HashMap::len)
    }

    /// Drop every subscriber; their streams see the channel close and end.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            closed += shard.values().map(HashMap::len).sum::<usize>();
            shard.clear();
        }
        debug!(closed, "closed all subscribers");
        closed
    }
}

/// A registered subscriber's receiving end.
pub struct Subscription {
    registry: Arc<SubscriptionRegistry>,
    owner_id: OwnerId,
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<StreamMessage>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// `None` once the registry dropped this subscriber.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.owner_id, self.id);
    }
}
