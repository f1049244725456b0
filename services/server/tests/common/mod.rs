#![allow(dead_code)]

use async_trait::async_trait;
use server::model::{
    NewCapturedEvent, NewSequenceEndpoint, OwnerId, SequenceEndpoint, SequenceEndpointPatch,
};
use server::repo::memory::{MemoryAccountStore, MemoryEventStore, MemorySequenceStore};
use server::repo::{
    EventSearch, EventStore, SequenceStore, StepClaim, StoreError, StoreResult,
};
use server::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use wt_protocol::CapturedEvent;

pub const OWNER: i64 = 1;
pub const OWNER_TOKEN: &str = "owner-one-token";
pub const OTHER_OWNER: i64 = 2;
pub const OTHER_TOKEN: &str = "owner-two-token";

pub struct TestApp {
    pub base_url: String,
    pub state: AppState,
    pub accounts: Arc<MemoryAccountStore>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Serve the router over in-memory stores on an ephemeral port.
pub async fn spawn_app() -> TestApp {
    let (state, accounts) = AppState::in_memory();
    accounts.add_token(OWNER, OWNER_TOKEN);
    accounts.add_token(OTHER_OWNER, OTHER_TOKEN);
    spawn_with_state(state, accounts).await
}

pub async fn spawn_with_state(state: AppState, accounts: Arc<MemoryAccountStore>) -> TestApp {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server::build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    TestApp {
        base_url: format!("http://{addr}"),
        state,
        accounts,
        client: reqwest::Client::new(),
    }
}

fn broken<T>() -> StoreResult<T> {
    Err(StoreError::Corrupt("store offline".to_owned()))
}

/// Event store whose every call fails.
pub struct BrokenEventStore;

#[async_trait]
impl EventStore for BrokenEventStore {
    async fn insert_event(&self, _event: NewCapturedEvent) -> StoreResult<CapturedEvent> {
        broken()
    }
    async fn recent_for_channel(
        &self,
        _owner_id: OwnerId,
        _channel_id: &str,
        _limit: i64,
    ) -> StoreResult<Vec<CapturedEvent>> {
        broken()
    }
    async fn channel_ids(&self, _owner_id: OwnerId) -> StoreResult<Vec<String>> {
        broken()
    }
    async fn search(
        &self,
        _owner_id: OwnerId,
        _search: &EventSearch,
    ) -> StoreResult<Vec<CapturedEvent>> {
        broken()
    }
    async fn recent_unread(&self, _owner_id: OwnerId, _limit: i64) -> StoreResult<Vec<CapturedEvent>> {
        broken()
    }
    async fn unread_count(&self, _owner_id: OwnerId) -> StoreResult<u64> {
        broken()
    }
    async fn mark_read(&self, _owner_id: OwnerId, _event_id: i64) -> StoreResult<bool> {
        broken()
    }
    async fn mark_all_read(&self, _owner_id: OwnerId) -> StoreResult<u64> {
        broken()
    }
    async fn delete_event(&self, _owner_id: OwnerId, _event_id: i64) -> StoreResult<Option<String>> {
        broken()
    }
}

/// Sequence store whose every call fails.
pub struct BrokenSequenceStore;

#[async_trait]
impl SequenceStore for BrokenSequenceStore {
    async fn list_endpoints(&self, _owner_id: OwnerId) -> StoreResult<Vec<SequenceEndpoint>> {
        broken()
    }
    async fn create_endpoint(
        &self,
        _owner_id: OwnerId,
        _endpoint: NewSequenceEndpoint,
    ) -> StoreResult<SequenceEndpoint> {
        broken()
    }
    async fn update_endpoint(
        &self,
        _owner_id: OwnerId,
        _endpoint_id: i64,
        _patch: SequenceEndpointPatch,
    ) -> StoreResult<Option<SequenceEndpoint>> {
        broken()
    }
    async fn delete_endpoint(&self, _owner_id: OwnerId, _endpoint_id: i64) -> StoreResult<bool> {
        broken()
    }
    async fn reset_endpoint(
        &self,
        _owner_id: OwnerId,
        _endpoint_id: i64,
    ) -> StoreResult<Option<SequenceEndpoint>> {
        broken()
    }
    async fn claim_step(
        &self,
        _owner_id: OwnerId,
        _endpoint_name: &str,
    ) -> StoreResult<Option<StepClaim>> {
        broken()
    }
}

/// App whose event store fails; accounts and sequences work.
pub async fn spawn_with_broken_events() -> TestApp {
    spawn_with_stores(Arc::new(BrokenEventStore), Arc::new(MemorySequenceStore::new())).await
}

/// App whose sequence store fails; accounts and events work.
pub async fn spawn_with_broken_sequences() -> TestApp {
    spawn_with_stores(Arc::new(MemoryEventStore::new()), Arc::new(BrokenSequenceStore)).await
}

async fn spawn_with_stores(
    events: Arc<dyn EventStore>,
    sequences: Arc<dyn SequenceStore>,
) -> TestApp {
    let accounts = Arc::new(MemoryAccountStore::new());
    accounts.add_token(OWNER, OWNER_TOKEN);
    accounts.add_token(OTHER_OWNER, OTHER_TOKEN);
    let state = AppState::with_stores(accounts.clone(), events, sequences);
    spawn_with_state(state, accounts).await
}
