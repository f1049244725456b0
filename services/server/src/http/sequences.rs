//! Sequence endpoint configuration API.

use super::response::{bad_request, not_found, store_error, validation_error, HttpResult};
use crate::auth::Principal;
use crate::model::{
    parse_description, parse_endpoint_name, parse_steps, NewSequenceEndpoint,
    SequenceEndpointPatch,
};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

pub async fn list_sequence_endpoints(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
) -> HttpResult<Response> {
    let endpoints = state
        .sequences
        .list_endpoints(owner_id)
        .await
        .map_err(store_error)?;
    Ok(Json(json!({ "endpoints": endpoints })).into_response())
}

pub async fn create_sequence_endpoint(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
    Json(body): Json<Value>,
) -> HttpResult<Response> {
    let endpoint_name =
        parse_endpoint_name(body.get("endpoint_name")).map_err(|e| validation_error(&e))?;
    let description = parse_description(body.get("description"))
        .map_err(|e| validation_error(&e))?
        .unwrap_or_default();
    let steps = parse_steps(body.get("sequence_config")).map_err(|e| validation_error(&e))?;

    let endpoint = state
        .sequences
        .create_endpoint(
            owner_id,
            NewSequenceEndpoint {
                endpoint_name,
                description,
                steps,
            },
        )
        .await
        .map_err(store_error)?;
    info!(
        owner_id,
        endpoint = %endpoint.endpoint_name,
        steps = endpoint.sequence_config.len(),
        "sequence endpoint created"
    );
    Ok((StatusCode::CREATED, Json(endpoint)).into_response())
}

pub async fn update_sequence_endpoint(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
    Path(endpoint_id): Path<i64>,
    Json(body): Json<Value>,
) -> HttpResult<Response> {
    let mut patch = SequenceEndpointPatch::default();
    if body.get("endpoint_name").is_some() {
        patch.endpoint_name =
            Some(parse_endpoint_name(body.get("endpoint_name")).map_err(|e| validation_error(&e))?);
    }
    patch.description = parse_description(body.get("description")).map_err(|e| validation_error(&e))?;
    if body.get("sequence_config").is_some() {
        patch.steps =
            Some(parse_steps(body.get("sequence_config")).map_err(|e| validation_error(&e))?);
    }
    match body.get("is_active") {
        None | Some(Value::Null) => {}
        Some(Value::Bool(active)) => patch.is_active = Some(*active),
        Some(_) => return Err(bad_request("is_active must be a boolean")),
    }
    if patch.is_empty() {
        return Err(bad_request("no fields to update"));
    }

    let updated = state
        .sequences
        .update_endpoint(owner_id, endpoint_id, patch)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found("sequence endpoint not found"))?;
    info!(owner_id, endpoint_id, "sequence endpoint updated");
    Ok(Json(updated).into_response())
}

pub async fn delete_sequence_endpoint(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
    Path(endpoint_id): Path<i64>,
) -> HttpResult<Response> {
    let deleted = state
        .sequences
        .delete_endpoint(owner_id, endpoint_id)
        .await
        .map_err(store_error)?;
    if !deleted {
        return Err(not_found("sequence endpoint not found"));
    }
    info!(owner_id, endpoint_id, "sequence endpoint deleted");
    Ok(Json(json!({ "message": "sequence endpoint deleted" })).into_response())
}

pub async fn reset_sequence_endpoint(
    State(state): State<AppState>,
    Principal(owner_id): Principal,
    Path(endpoint_id): Path<i64>,
) -> HttpResult<Response> {
    let endpoint = state
        .sequences
        .reset_endpoint(owner_id, endpoint_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found("sequence endpoint not found"))?;
    info!(owner_id, endpoint_id, "sequence endpoint reset");
    Ok(Json(endpoint).into_response())
}
