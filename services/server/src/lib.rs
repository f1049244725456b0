pub mod auth;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod http;
pub mod model;
pub mod registry;
pub mod repo;
pub mod state;

pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    routing::{any, delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let webhook = get(http::webhook::webhook)
        .post(http::webhook::webhook)
        .put(http::webhook::webhook)
        .delete(http::webhook::webhook)
        .patch(http::webhook::webhook)
        .head(http::webhook::webhook)
        .options(http::webhook::webhook);
    let body_limit = state.max_body_bytes;

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/webhook/{owner_id}/{webhook_id}", webhook)
        .route("/events/{owner_id}", get(http::stream::live_stream))
        .route(
            "/sequence-endpoint/{owner_id}/{endpoint_name}",
            any(http::sequence_endpoint::invoke_sequence_endpoint),
        )
        .route("/httpcode/{code}", any(http::httpcode::status_code_tester))
        .route("/api/v1/channels", get(http::requests::list_channels))
        .route("/api/v1/requests/search", post(http::requests::search_requests))
        .route(
            "/api/v1/requests/{request_id}/read",
            post(http::requests::mark_request_read),
        )
        .route(
            "/api/v1/requests/{request_id}",
            delete(http::requests::delete_request),
        )
        .route("/api/v1/notifications", get(http::requests::list_notifications))
        .route(
            "/api/v1/notifications/read-all",
            post(http::requests::mark_all_read),
        )
        .route(
            "/api/v1/sequence-endpoints",
            get(http::sequences::list_sequence_endpoints)
                .post(http::sequences::create_sequence_endpoint),
        )
        .route(
            "/api/v1/sequence-endpoints/{endpoint_id}",
            put(http::sequences::update_sequence_endpoint)
                .delete(http::sequences::delete_sequence_endpoint),
        )
        .route(
            "/api/v1/sequence-endpoints/{endpoint_id}/reset",
            post(http::sequences::reset_sequence_endpoint),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

mod health {
    use crate::state::AppState;
    use axum::{extract::State, http::StatusCode, response::IntoResponse};
    use tracing::warn;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }

    pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
        match state.accounts.ping().await {
            Ok(()) => (StatusCode::OK, "ok"),
            Err(err) => {
                warn!(error = %err, "readiness check failed");
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
        }
    }
}
