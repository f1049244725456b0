//! Sequence engine and the status-code renderer it shares with `/httpcode`.

use crate::model::{OwnerId, SequenceStep};
use crate::repo::{SequenceStore, StepClaim, StoreResult};
use axum::{
    body::Body,
    http::{
        header::{HeaderValue, LOCATION, RETRY_AFTER, WWW_AUTHENTICATE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// What the renderer echoes back about the inbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    /// Decoded body of a POST/PUT/PATCH, if it had one.
    pub received_data: Option<Value>,
}

pub fn canonical_reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Custom Status Code",
    }
}

fn apply_status_headers(code: u16, headers: &mut HeaderMap) {
    match code {
        401 => {
            headers.insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"Authentication Required\""),
            );
        }
        301 | 302 | 307 | 308 => {
            headers.insert(LOCATION, HeaderValue::from_static("/"));
        }
        429 => {
            headers.insert(RETRY_AFTER, HeaderValue::from_static("60"));
        }
        503 => {
            headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        }
        _ => {}
    }
}

/// Render a status-code response: the JSON envelope plus `extra` fields,
/// status-specific headers, and an empty body for 204.
pub fn render_status(code: u16, request: &InboundRequest, extra: Map<String, Value>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = if code == 204 {
        (status, Body::empty()).into_response()
    } else {
        let mut envelope = Map::new();
        envelope.insert("status".into(), json!(code));
        envelope.insert("message".into(), json!(canonical_reason(code)));
        envelope.insert("method".into(), json!(request.method));
        envelope.insert("path".into(), json!(request.path));
        envelope.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        envelope.extend(extra);
        if let Some(data) = request.received_data.as_ref() {
            envelope.insert("received_data".into(), data.clone());
        }
        (status, Json(Value::Object(envelope))).into_response()
    };
    apply_status_headers(code, response.headers_mut());
    response
}

fn step_summary(index: usize, step: &SequenceStep) -> Value {
    json!({
        "index": index,
        "http_code": step.http_code,
        "delay_ms": step.delay_ms,
    })
}

/// Build the response for the step a claim served.
///
/// A 200 step with a payload returns the payload verbatim; everything else
/// gets the status envelope annotated with the sequence position.
pub fn render_step(claim: &StepClaim, request: &InboundRequest) -> Response {
    let step = &claim.step;
    if step.http_code == 200 {
        if let Some(payload) = step.payload.as_ref() {
            return (StatusCode::OK, Json(payload.clone())).into_response();
        }
    }

    let mut extra = Map::new();
    extra.insert("endpoint_name".into(), json!(claim.endpoint.endpoint_name));
    extra.insert(
        "current_step".into(),
        step_summary(claim.step_index, step),
    );
    extra.insert(
        "next_step".into(),
        claim
            .next_step()
            .map_or(Value::Null, |next| step_summary(claim.next_index(), next)),
    );
    extra.insert("total_steps".into(), json!(claim.total_steps()));
    if let Some(payload) = step.payload.as_ref() {
        extra.insert("payload".into(), payload.clone());
    }
    render_status(step.http_code, request, extra)
}

/// Serve one invocation of a sequence endpoint.
///
/// The cursor is advanced by the claim before the delay; the lease is held
/// until the response is built.  `None` means no active endpoint by that
/// name.
pub async fn invoke(
    sequences: Arc<dyn SequenceStore>,
    owner_id: OwnerId,
    endpoint_name: String,
    request: InboundRequest,
) -> StoreResult<Option<Response>> {
    let Some(claim) = sequences.claim_step(owner_id, &endpoint_name).await? else {
        return Ok(None);
    };
    info!(
        owner_id,
        endpoint = %endpoint_name,
        step = claim.step_index,
        http_code = claim.step.http_code,
        delay_ms = claim.step.delay_ms,
        "serving sequence step"
    );
    if claim.step.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(u64::from(claim.step.delay_ms))).await;
    }
    let response = render_step(&claim, &request);
    claim.release().await;
    Ok(Some(response))
}
