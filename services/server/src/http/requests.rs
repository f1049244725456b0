//! Captured-request management: channels, search, read flags, deletion.

use super::response::{bad_request, internal_error, not_found, HttpResult};
use crate::auth::Principal;
use crate::model::storable_text;
use crate::repo::{match_context, EventSearch};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use wt_protocol::StreamMessage;

pub const SEARCH_LIMIT: i64 = 100;
pub const NOTIFICATION_LIMIT: i64 = 10;

pub async fn list_channels(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
) -> HttpResult<Response> {
    let ids = state
        .events
        .channel_ids(owner_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "ids": ids })).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub search_term: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Start,
    End,
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM[:SS]` (UTC) or `YYYY-MM-DD`.  A bare
/// date used as an end bound covers the whole day.
fn parse_bound(raw: &str, bound: Bound) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let start = date.and_time(NaiveTime::MIN).and_utc();
    match bound {
        Bound::Start => Some(start),
        Bound::End => start
            .checked_add_days(Days::new(1))
            .map(|next| next - TimeDelta::microseconds(1)),
    }
}

fn optional_bound(raw: Option<&str>, bound: Bound, field: &str) -> HttpResult<Option<DateTime<Utc>>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => parse_bound(value, bound)
            .map(Some)
            .ok_or_else(|| bad_request(format!("{field} is not a valid date"))),
    }
}

pub async fn search_requests(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
    Json(body): Json<SearchRequest>,
) -> HttpResult<Response> {
    let term = body
        .search_term
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(storable_text);
    let search = EventSearch {
        term,
        start: optional_bound(body.start_date.as_deref(), Bound::Start, "start_date")?,
        end: optional_bound(body.end_date.as_deref(), Bound::End, "end_date")?,
        limit: SEARCH_LIMIT,
    };

    let events = state
        .events
        .search(owner_id, &search)
        .await
        .map_err(internal_error)?;
    info!(
        owner_id,
        term = search.term.as_deref().unwrap_or(""),
        results = events.len(),
        "searched requests"
    );

    let results: Vec<Value> = events
        .iter()
        .map(|event| {
            let context = search
                .term
                .as_deref()
                .map(|term| match_context(event, term))
                .unwrap_or_default();
            let mut value = json!(event);
            if let Value::Object(map) = &mut value {
                map.insert("match_context".into(), json!(context));
            }
            value
        })
        .collect();
    Ok(Json(json!({ "results": results })).into_response())
}

pub async fn mark_request_read(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
    Path(request_id): Path<i64>,
) -> HttpResult<Response> {
    let updated = state
        .events
        .mark_read(owner_id, request_id)
        .await
        .map_err(internal_error)?;
    if !updated {
        return Err(not_found("request not found"));
    }
    Ok(Json(json!({ "message": "marked as read" })).into_response())
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
) -> HttpResult<Response> {
    let notifications = state
        .events
        .recent_unread(owner_id, NOTIFICATION_LIMIT)
        .await
        .map_err(internal_error)?;
    let unread_count = state
        .events
        .unread_count(owner_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({
        "notifications": notifications,
        "unread_count": unread_count,
    }))
    .into_response())
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
) -> HttpResult<Response> {
    let marked = state
        .events
        .mark_all_read(owner_id)
        .await
        .map_err(internal_error)?;
    info!(owner_id, marked, "marked all requests read");

    state
        .dispatcher
        .notify(owner_id, StreamMessage::NotificationsCleared { count: 0 });

    Ok(Json(json!({
        "message": format!("Marked {marked} notifications as read"),
        "marked": marked,
    }))
    .into_response())
}

pub async fn delete_request(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
    Path(request_id): Path<i64>,
) -> HttpResult<Response> {
    let Some(webhook_id) = state
        .events
        .delete_event(owner_id, request_id)
        .await
        .map_err(internal_error)?
    else {
        return Err(not_found("request not found"));
    };
    info!(owner_id, webhook_id = %webhook_id, request_id, "deleted request");

    state.dispatcher.notify(
        owner_id,
        StreamMessage::WebhookDeleted {
            webhook_id: webhook_id.clone(),
            request_id,
        },
    );

    Ok(Json(json!({
        "message": "request deleted",
        "webhook_id": webhook_id,
        "request_id": request_id,
    }))
    .into_response())
}
