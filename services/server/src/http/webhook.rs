use super::capture::{client_ip, decode_body, header_map, query_map};
use super::response::{internal_error, not_found, HttpResult};
use crate::model::{storable_text, NewCapturedEvent, OwnerId};
use crate::state::AppState;
use axum::{
    extract::{Path, Request, State},
    http::{header::ALLOW, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

pub const RECENT_LIMIT: i64 = 20;
const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS";

/// Resolve the owner path segment; unknown or non-numeric owners are 404.
async fn known_owner(state: &AppState, raw: &str) -> HttpResult<OwnerId> {
    let Ok(owner_id) = raw.parse::<OwnerId>() else {
        return Err(not_found("user does not exist"));
    };
    match state.accounts.owner_exists(owner_id).await {
        Ok(true) => Ok(owner_id),
        Ok(false) => {
            warn!(owner_id, "capture for unknown owner");
            Err(not_found("user does not exist"))
        }
        Err(err) => Err(internal_error(err)),
    }
}

/// Every method on a channel URL: `GET` lists, the rest capture.
pub async fn webhook(
    State(state): State<AppState>,
    Path((owner, webhook_id)): Path<(String, String)>,
    request: Request,
) -> HttpResult<Response> {
    let owner_id = known_owner(&state, &owner).await?;
    let webhook_id = storable_text(&webhook_id);

    if request.method() == Method::GET {
        let events = state
            .events
            .recent_for_channel(owner_id, &webhook_id, RECENT_LIMIT)
            .await
            .map_err(internal_error)?;
        return Ok(Json(events).into_response());
    }

    let method = request.method().clone();
    let headers = header_map(request.headers());
    let query_params = query_map(request.uri());
    let client_ip = client_ip(request.headers(), request.extensions());
    let (body_kind, body) = decode_body(request).await?;

    let event = state
        .events
        .insert_event(NewCapturedEvent {
            owner_id,
            channel_id: webhook_id.clone(),
            method: method.to_string(),
            headers,
            body_kind,
            body,
            query_params,
            captured_at: Utc::now(),
            client_ip,
        })
        .await
        .map_err(internal_error)?;
    info!(
        owner_id,
        webhook_id = %webhook_id,
        request_id = event.id,
        method = %method,
        client_ip = event.client_ip.as_deref().unwrap_or("-"),
        "captured webhook"
    );

    state.dispatcher.notify_captured(&event);

    if method == Method::HEAD {
        return Ok(StatusCode::OK.into_response());
    }
    if method == Method::OPTIONS {
        let mut response = Json(json!({
            "message": "Options request received and logged successfully",
            "id": event.id,
        }))
        .into_response();
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        return Ok(response);
    }
    Ok(Json(json!({
        "message": format!("{method} webhook received and logged successfully"),
        "id": event.id,
    }))
    .into_response())
}
