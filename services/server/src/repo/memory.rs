//! In-memory stores for tests and embedding.
//!
//! They follow the Postgres stores' semantics, including the per-endpoint
//! lease that serialises sequence invocations.

use super::{
    advance_index, match_context, normalize_index, AccountStore, EventSearch, EventStore,
    SequenceStore, StepClaim, StepLease, StoreError, StoreResult,
};
use crate::auth::hash_token;
use crate::model::{
    NewCapturedEvent, NewSequenceEndpoint, OwnerId, SequenceEndpoint, SequenceEndpointPatch,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use wt_protocol::CapturedEvent;

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAccountStore {
    owners: RwLock<HashSet<OwnerId>>,
    tokens: RwLock<HashMap<Vec<u8>, OwnerId>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_owner(&self, owner_id: OwnerId) {
        self.owners.write().insert(owner_id);
    }

    /// Register an owner together with a bearer token for it.
    pub fn add_token(&self, owner_id: OwnerId, raw_token: &str) {
        self.add_owner(owner_id);
        self.tokens.write().insert(hash_token(raw_token), owner_id);
    }

    pub fn revoke_token(&self, raw_token: &str) {
        self.tokens.write().remove(&hash_token(raw_token));
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn owner_exists(&self, owner_id: OwnerId) -> StoreResult<bool> {
        Ok(self.owners.read().contains(&owner_id))
    }

    async fn resolve_token_hash(&self, token_hash: &[u8]) -> StoreResult<Option<OwnerId>> {
        Ok(self.tokens.read().get(token_hash).copied())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Captured events
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryEventStore {
    inner: RwLock<EventsInner>,
}

#[derive(Default)]
struct EventsInner {
    next_id: i64,
    events: Vec<CapturedEvent>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first<'a>(events: impl Iterator<Item = &'a CapturedEvent>) -> Vec<CapturedEvent> {
        let mut out: Vec<CapturedEvent> = events.cloned().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        out
    }
}

fn take(events: Vec<CapturedEvent>, limit: i64) -> Vec<CapturedEvent> {
    let limit = usize::try_from(limit).unwrap_or(0);
    events.into_iter().take(limit).collect()
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_event(&self, event: NewCapturedEvent) -> StoreResult<CapturedEvent> {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let stored = CapturedEvent {
            id: inner.next_id,
            owner_id: event.owner_id,
            webhook_id: event.channel_id,
            method: event.method,
            headers: event.headers,
            body_kind: event.body_kind,
            body: event.body,
            query_params: event.query_params,
            timestamp: event.captured_at,
            client_ip: event.client_ip,
            is_read: false,
        };
        inner.events.push(stored.clone());
        Ok(stored)
    }

    async fn recent_for_channel(
        &self,
        owner_id: OwnerId,
        channel_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<CapturedEvent>> {
        let inner = self.inner.read();
        let events = Self::newest_first(
            inner
                .events
                .iter()
                .filter(|e| e.owner_id == owner_id && e.webhook_id == channel_id),
        );
        Ok(take(events, limit))
    }

    async fn channel_ids(&self, owner_id: OwnerId) -> StoreResult<Vec<String>> {
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        Ok(
            Self::newest_first(inner.events.iter().filter(|e| e.owner_id == owner_id))
                .into_iter()
                .filter(|e| seen.insert(e.webhook_id.clone()))
                .map(|e| e.webhook_id)
                .collect(),
        )
    }

    async fn search(
        &self,
        owner_id: OwnerId,
        search: &EventSearch,
    ) -> StoreResult<Vec<CapturedEvent>> {
        let inner = self.inner.read();
        let events = Self::newest_first(inner.events.iter().filter(|e| {
            e.owner_id == owner_id
                && search.start.map_or(true, |start| e.timestamp >= start)
                && search.end.map_or(true, |end| e.timestamp <= end)
                && search
                    .term
                    .as_deref()
                    .map_or(true, |term| !match_context(e, term).is_empty())
        }));
        Ok(take(events, search.limit))
    }

    async fn recent_unread(
        &self,
        owner_id: OwnerId,
        limit: i64,
    ) -> StoreResult<Vec<CapturedEvent>> {
        let inner = self.inner.read();
        let events = Self::newest_first(
            inner
                .events
                .iter()
                .filter(|e| e.owner_id == owner_id && !e.is_read),
        );
        Ok(take(events, limit))
    }

    async fn unread_count(&self, owner_id: OwnerId) -> StoreResult<u64> {
        let inner = self.inner.read();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.owner_id == owner_id && !e.is_read)
            .count() as u64)
    }

    async fn mark_read(&self, owner_id: OwnerId, event_id: i64) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        match inner
            .events
            .iter_mut()
            .find(|e| e.owner_id == owner_id && e.id == event_id)
        {
            Some(event) => {
                event.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, owner_id: OwnerId) -> StoreResult<u64> {
        let mut inner = self.inner.write();
        let mut affected = 0;
        for event in inner
            .events
            .iter_mut()
            .filter(|e| e.owner_id == owner_id && !e.is_read)
        {
            event.is_read = true;
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete_event(&self, owner_id: OwnerId, event_id: i64) -> StoreResult<Option<String>> {
        let mut inner = self.inner.write();
        let position = inner
            .events
            .iter()
            .position(|e| e.owner_id == owner_id && e.id == event_id);
        Ok(position.map(|idx| inner.events.remove(idx).webhook_id))
    }
}

// ---------------------------------------------------------------------------
// Sequence endpoints
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySequenceStore {
    inner: RwLock<SequencesInner>,
}

#[derive(Default)]
struct SequencesInner {
    next_id: i64,
    endpoints: HashMap<i64, MemoryEndpoint>,
}

struct MemoryEndpoint {
    record: SequenceEndpoint,
    /// Held by a claim from the cursor read until the response is built.
    gate: Arc<Mutex<()>>,
}

struct GateLease(OwnedMutexGuard<()>);

#[async_trait]
impl StepLease for GateLease {
    async fn release(self: Box<Self>) {
        drop(self.0);
    }
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SequencesInner {
    fn owned_mut(&mut self, owner_id: OwnerId, endpoint_id: i64) -> Option<&mut MemoryEndpoint> {
        self.endpoints
            .get_mut(&endpoint_id)
            .filter(|e| e.record.owner_id == owner_id)
    }

    fn name_taken(&self, owner_id: OwnerId, name: &str, except: Option<i64>) -> bool {
        self.endpoints.values().any(|e| {
            e.record.owner_id == owner_id
                && e.record.endpoint_name == name
                && Some(e.record.id) != except
        })
    }
}

fn duplicate_name(name: &str) -> StoreError {
    StoreError::Conflict(format!("endpoint name '{name}' already exists"))
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    async fn list_endpoints(&self, owner_id: OwnerId) -> StoreResult<Vec<SequenceEndpoint>> {
        let inner = self.inner.read();
        let mut endpoints: Vec<SequenceEndpoint> = inner
            .endpoints
            .values()
            .filter(|e| e.record.owner_id == owner_id)
            .map(|e| e.record.clone())
            .collect();
        endpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(endpoints)
    }

    async fn create_endpoint(
        &self,
        owner_id: OwnerId,
        endpoint: NewSequenceEndpoint,
    ) -> StoreResult<SequenceEndpoint> {
        let mut inner = self.inner.write();
        if inner.name_taken(owner_id, &endpoint.endpoint_name, None) {
            return Err(duplicate_name(&endpoint.endpoint_name));
        }
        inner.next_id += 1;
        let now = Utc::now();
        let record = SequenceEndpoint {
            id: inner.next_id,
            owner_id,
            endpoint_name: endpoint.endpoint_name,
            description: endpoint.description,
            sequence_config: endpoint.steps,
            current_index: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        inner.endpoints.insert(
            record.id,
            MemoryEndpoint {
                record: record.clone(),
                gate: Arc::new(Mutex::new(())),
            },
        );
        Ok(record)
    }

    async fn update_endpoint(
        &self,
        owner_id: OwnerId,
        endpoint_id: i64,
        patch: SequenceEndpointPatch,
    ) -> StoreResult<Option<SequenceEndpoint>> {
        let mut inner = self.inner.write();
        if let Some(name) = patch.endpoint_name.as_deref() {
            if inner.name_taken(owner_id, name, Some(endpoint_id)) {
                return Err(duplicate_name(name));
            }
        }
        let Some(endpoint) = inner.owned_mut(owner_id, endpoint_id) else {
            return Ok(None);
        };
        let record = &mut endpoint.record;
        if let Some(name) = patch.endpoint_name {
            record.endpoint_name = name;
        }
        if let Some(description) = patch.description {
            record.description = description;
        }
        if let Some(steps) = patch.steps {
            record.sequence_config = steps;
            record.current_index = 0;
        }
        if let Some(is_active) = patch.is_active {
            record.is_active = is_active;
        }
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn delete_endpoint(&self, owner_id: OwnerId, endpoint_id: i64) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        if inner.owned_mut(owner_id, endpoint_id).is_none() {
            return Ok(false);
        }
        inner.endpoints.remove(&endpoint_id);
        Ok(true)
    }

    async fn reset_endpoint(
        &self,
        owner_id: OwnerId,
        endpoint_id: i64,
    ) -> StoreResult<Option<SequenceEndpoint>> {
        let mut inner = self.inner.write();
        Ok(inner.owned_mut(owner_id, endpoint_id).map(|endpoint| {
            endpoint.record.current_index = 0;
            endpoint.record.updated_at = Utc::now();
            endpoint.record.clone()
        }))
    }

    async fn claim_step(
        &self,
        owner_id: OwnerId,
        endpoint_name: &str,
    ) -> StoreResult<Option<StepClaim>> {
        let found = {
            let inner = self.inner.read();
            inner
                .endpoints
                .values()
                .find(|e| {
                    e.record.owner_id == owner_id
                        && e.record.endpoint_name == endpoint_name
                        && e.record.is_active
                })
                .map(|e| (e.record.id, Arc::clone(&e.gate)))
        };
        let Some((endpoint_id, gate)) = found else {
            return Ok(None);
        };

        let guard = gate.lock_owned().await;

        // The endpoint may have been deleted or deactivated while waiting.
        let mut inner = self.inner.write();
        let Some(endpoint) = inner
            .owned_mut(owner_id, endpoint_id)
            .filter(|e| e.record.is_active && !e.record.sequence_config.is_empty())
        else {
            return Ok(None);
        };
        let record = &mut endpoint.record;
        let len = record.sequence_config.len();
        let step_index = normalize_index(record.current_index, len);
        let step = record.sequence_config[step_index].clone();
        record.current_index = advance_index(step_index, len);
        record.updated_at = Utc::now();

        Ok(Some(StepClaim::new(
            record.clone(),
            step_index,
            step,
            Box::new(GateLease(guard)),
        )))
    }
}
