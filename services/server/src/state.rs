use crate::config::ServerConfig;
use crate::dispatcher::StreamDispatcher;
use crate::registry::SubscriptionRegistry;
use crate::repo::accounts::PgAccountStore;
use crate::repo::events::PgEventStore;
use crate::repo::memory::{MemoryAccountStore, MemoryEventStore, MemorySequenceStore};
use crate::repo::sequences::PgSequenceStore;
use crate::repo::{AccountStore, EventStore, SequenceStore};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_IDLE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<dyn AccountStore>,
    pub events: Arc<dyn EventStore>,
    pub sequences: Arc<dyn SequenceStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub dispatcher: StreamDispatcher,
    pub heartbeat_idle: Duration,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(pool: PgPool, config: &ServerConfig) -> Self {
        Self::with_stores(
            Arc::new(PgAccountStore::new(pool.clone())),
            Arc::new(PgEventStore::new(pool.clone())),
            Arc::new(PgSequenceStore::new(pool)),
        )
        .with_limits(config.heartbeat_idle, config.max_body_bytes)
    }

    /// State over the given stores with a fresh subscription registry.
    pub fn with_stores(
        accounts: Arc<dyn AccountStore>,
        events: Arc<dyn EventStore>,
        sequences: Arc<dyn SequenceStore>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        Self {
            accounts,
            events,
            sequences,
            dispatcher: StreamDispatcher::new(Arc::clone(&registry)),
            registry,
            heartbeat_idle: DEFAULT_HEARTBEAT_IDLE,
            max_body_bytes: 5 * 1024 * 1024,
        }
    }

    /// Fully in-memory state; accounts are registered on the returned store.
    pub fn in_memory() -> (Self, Arc<MemoryAccountStore>) {
        let accounts = Arc::new(MemoryAccountStore::new());
        let state = Self::with_stores(
            accounts.clone(),
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemorySequenceStore::new()),
        );
        (state, accounts)
    }

    pub fn with_limits(mut self, heartbeat_idle: Duration, max_body_bytes: usize) -> Self {
        self.heartbeat_idle = heartbeat_idle;
        self.max_body_bytes = max_body_bytes;
        self
    }
}
