use super::capture::received_data;
use super::response::{internal_error, not_found, HttpResult};
use crate::engine::{self, InboundRequest};
use crate::model::OwnerId;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, Uri},
    response::Response,
};
use tracing::{error, warn};

/// `ANY /sequence-endpoint/{owner}/{name}`: serve the endpoint's current step.
pub async fn invoke_sequence_endpoint(
    State(state): State<AppState>,
    Path((owner, endpoint_name)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResult<Response> {
    let Ok(owner_id) = owner.parse::<OwnerId>() else {
        return Err(not_found("sequence endpoint not found"));
    };
    // Names are validated NUL-free, and Postgres rejects the byte in a bind.
    if endpoint_name.contains('\0') {
        return Err(not_found("sequence endpoint not found or inactive"));
    }
    let request = InboundRequest {
        received_data: received_data(&method, &headers, &body),
        method: method.to_string(),
        path: uri.path().to_owned(),
    };

    // Detached so a client hanging up mid-delay cannot cancel the invocation
    // while it holds the endpoint's lease.
    let task = tokio::spawn(engine::invoke(
        state.sequences.clone(),
        owner_id,
        endpoint_name.clone(),
        request,
    ));
    match task.await {
        Ok(Ok(Some(response))) => Ok(response),
        Ok(Ok(None)) => {
            warn!(owner_id, endpoint = %endpoint_name, "no active sequence endpoint");
            Err(not_found("sequence endpoint not found or inactive"))
        }
        Ok(Err(err)) => Err(internal_error(err)),
        Err(join_err) => {
            error!(owner_id, endpoint = %endpoint_name, error = %join_err, "sequence invocation aborted");
            Err(internal_error(join_err))
        }
    }
}
