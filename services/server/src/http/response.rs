use crate::model::StepValidationError;
use crate::repo::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt::Display;
use tracing::error;
use wt_protocol::HttpErrorEnvelope;

pub type HttpResponse = Response;
pub type HttpResult<T = ()> = Result<T, HttpResponse>;

pub(crate) fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> HttpResponse {
    error_with_details(status, code, message, None)
}

fn error_with_details(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> HttpResponse {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details,
        }),
    )
        .into_response()
}

/// Log the cause and answer with a generic 500.
pub fn internal_error(err: impl Display) -> HttpResponse {
    error!(error = %err, "request failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "internal server error",
    )
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
}

pub fn unauthorized(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}

pub fn forbidden(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::FORBIDDEN, "FORBIDDEN", message)
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn conflict(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::CONFLICT, "CONFLICT", message)
}

pub fn validation_error(err: &StepValidationError) -> HttpResponse {
    error_with_details(
        StatusCode::BAD_REQUEST,
        "VALIDATION_ERROR",
        err.message.clone(),
        Some(serde_json::json!({ "step": err.step, "field": err.field })),
    )
}

/// Map a store failure; conflicts are the caller's fault, the rest are ours.
pub fn store_error(err: StoreError) -> HttpResponse {
    match err {
        StoreError::Conflict(message) => conflict(message),
        other => internal_error(other),
    }
}
