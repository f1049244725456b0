//! Persistent stores.
//!
//! Each store is a trait with a Postgres implementation (`accounts`,
//! `events`, `sequences`) and an in-memory one (`memory`).  Handlers only see
//! the traits.

use crate::model::{
    NewCapturedEvent, NewSequenceEndpoint, OwnerId, SequenceEndpoint, SequenceEndpointPatch,
    SequenceStep,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wt_protocol::CapturedEvent;

pub mod accounts;
pub mod events;
pub mod memory;
pub mod sequences;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filters for a full-text-ish search over an owner's captured events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSearch {
    /// Case-insensitive substring matched against body, headers, query
    /// params, channel id and method.
    pub term: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: i64,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn owner_exists(&self, owner_id: OwnerId) -> StoreResult<bool>;
    /// Map a sha256 token hash to its owner; revoked tokens resolve to `None`.
    async fn resolve_token_hash(&self, token_hash: &[u8]) -> StoreResult<Option<OwnerId>>;
    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: NewCapturedEvent) -> StoreResult<CapturedEvent>;
    /// Newest first.
    async fn recent_for_channel(
        &self,
        owner_id: OwnerId,
        channel_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<CapturedEvent>>;
    /// Channel ids ordered by most recent capture first.
    async fn channel_ids(&self, owner_id: OwnerId) -> StoreResult<Vec<String>>;
    async fn search(&self, owner_id: OwnerId, search: &EventSearch)
        -> StoreResult<Vec<CapturedEvent>>;
    /// Newest unread events across all channels.
    async fn recent_unread(&self, owner_id: OwnerId, limit: i64) -> StoreResult<Vec<CapturedEvent>>;
    async fn unread_count(&self, owner_id: OwnerId) -> StoreResult<u64>;
    async fn mark_read(&self, owner_id: OwnerId, event_id: i64) -> StoreResult<bool>;
    /// Returns the number of rows that flipped from unread to read.
    async fn mark_all_read(&self, owner_id: OwnerId) -> StoreResult<u64>;
    /// Returns the channel of the deleted row, `None` if the owner has no such row.
    async fn delete_event(&self, owner_id: OwnerId, event_id: i64) -> StoreResult<Option<String>>;
}

#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn list_endpoints(&self, owner_id: OwnerId) -> StoreResult<Vec<SequenceEndpoint>>;
    async fn create_endpoint(
        &self,
        owner_id: OwnerId,
        endpoint: NewSequenceEndpoint,
    ) -> StoreResult<SequenceEndpoint>;
    async fn update_endpoint(
        &self,
        owner_id: OwnerId,
        endpoint_id: i64,
        patch: SequenceEndpointPatch,
    ) -> StoreResult<Option<SequenceEndpoint>>;
    async fn delete_endpoint(&self, owner_id: OwnerId, endpoint_id: i64) -> StoreResult<bool>;
    async fn reset_endpoint(
        &self,
        owner_id: OwnerId,
        endpoint_id: i64,
    ) -> StoreResult<Option<SequenceEndpoint>>;
    /// Take the endpoint's exclusive lease, read the step at the cursor and
    /// durably advance the cursor.
    ///
    /// Returns `None` for unknown or inactive endpoints.  The lease is held
    /// by the returned claim until [`StepClaim::release`]; other claims on
    /// the same endpoint wait for it.
    async fn claim_step(&self, owner_id: OwnerId, endpoint_name: &str)
        -> StoreResult<Option<StepClaim>>;
}

/// Exclusive right to serve one step of an endpoint.
#[async_trait]
pub trait StepLease: Send {
    async fn release(self: Box<Self>);
}

/// The step served by one invocation, with the cursor already advanced.
pub struct StepClaim {
    /// Endpoint state after the advance (`current_index` is the next step).
    pub endpoint: SequenceEndpoint,
    pub step_index: usize,
    pub step: SequenceStep,
    lease: Box<dyn StepLease>,
}

impl StepClaim {
    pub fn new(
        endpoint: SequenceEndpoint,
        step_index: usize,
        step: SequenceStep,
        lease: Box<dyn StepLease>,
    ) -> Self {
        Self {
            endpoint,
            step_index,
            step,
            lease,
        }
    }

    pub fn next_index(&self) -> usize {
        self.endpoint.current_index
    }

    pub fn next_step(&self) -> Option<&SequenceStep> {
        self.endpoint.sequence_config.get(self.endpoint.current_index)
    }

    pub fn total_steps(&self) -> usize {
        self.endpoint.sequence_config.len()
    }

    /// Let the next caller in.
    pub async fn release(self) {
        self.lease.release().await;
    }
}

/// Cursor position after serving `current` of `len` steps.
pub fn advance_index(current: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        (current + 1) % len
    }
}

/// Clamp a persisted cursor into range; a step list shrunk underneath it
/// starts over.
pub fn normalize_index(index: usize, len: usize) -> usize {
    if index < len {
        index
    } else {
        0
    }
}

/// Escape `%`, `_` and `\` so a search term matches literally inside `ILIKE`.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Which fields of an event contain `term` (case-insensitive).
pub fn match_context(event: &CapturedEvent, term: &str) -> Vec<&'static str> {
    let needle = term.to_lowercase();
    let contains = |haystack: String| haystack.to_lowercase().contains(&needle);
    let mut fields = Vec::new();
    if contains(event.body.to_string()) {
        fields.push("body");
    }
    if contains(serde_json::to_string(&event.headers).unwrap_or_default()) {
        fields.push("headers");
    }
    if contains(serde_json::to_string(&event.query_params).unwrap_or_default()) {
        fields.push("query_params");
    }
    if contains(event.webhook_id.clone()) {
        fields.push("webhook_id");
    }
    if contains(event.method.clone()) {
        fields.push("method");
    }
    fields
}
