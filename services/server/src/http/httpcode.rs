use super::capture::received_data;
use super::response::{bad_request, HttpResult};
use crate::engine::{render_status, InboundRequest};
use crate::model::{MAX_HTTP_CODE, MIN_HTTP_CODE};
use axum::{
    body::Bytes,
    extract::Path,
    http::{HeaderMap, Method, Uri},
    response::Response,
};
use serde_json::Map;

/// `ANY /httpcode/{code}`: answer with the requested status.
pub async fn status_code_tester(
    Path(code): Path<i64>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResult<Response> {
    if !(MIN_HTTP_CODE..=MAX_HTTP_CODE).contains(&code) {
        return Err(bad_request(format!(
            "invalid status code, must be between {MIN_HTTP_CODE} and {MAX_HTTP_CODE}"
        )));
    }
    let code = u16::try_from(code).map_err(|_| bad_request("invalid status code"))?;
    let request = InboundRequest {
        received_data: received_data(&method, &headers, &body),
        method: method.to_string(),
        path: uri.path().to_owned(),
    };
    Ok(render_status(code, &request, Map::new()))
}
