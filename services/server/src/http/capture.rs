//! Turning an inbound HTTP request into the pieces of a captured event.

use super::response::HttpResult;
use crate::model::{storable_text, storable_value};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequest, Multipart, Query, Request},
    http::{header::CONTENT_TYPE, request::Parts, Extensions, HeaderMap, Method, Uri},
    response::IntoResponse,
    Form,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use wt_protocol::BodyKind;

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn is_json(content_type: &str) -> bool {
    content_type.contains("application/json")
}

/// Header map with lowercase names; repeated headers are joined with `, `.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = storable_text(&String::from_utf8_lossy(value.as_bytes()));
        out.entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

/// Query parameters; the first value of a repeated key wins.
pub fn query_map(uri: &Uri) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::try_from_uri(uri) {
        for (key, value) in pairs {
            out.entry(storable_text(&key))
                .or_insert_with(|| storable_text(&value));
        }
    }
    out
}

/// Origin address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// transport peer.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    if let Some(first) = header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(first.to_owned());
    }
    if let Some(real_ip) = header("x-real-ip") {
        return Some(real_ip.to_owned());
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// NUL counts as binary: Postgres cannot store it in text.
fn text_or_binary(bytes: &[u8]) -> (BodyKind, Value) {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.contains('\0') => (BodyKind::Text, Value::String(text.to_owned())),
        _ => (
            BodyKind::Binary,
            Value::String(format!("<Binary data: {} bytes>", bytes.len())),
        ),
    }
}

async fn form_pairs(bytes: Bytes) -> Option<Vec<(String, String)>> {
    let request = Request::builder()
        .method(Method::POST)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(bytes))
        .ok()?;
    Form::<Vec<(String, String)>>::from_request(request, &())
        .await
        .ok()
        .map(|Form(pairs)| pairs)
}

fn first_wins(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        map.entry(storable_text(&key))
            .or_insert_with(|| Value::String(storable_text(&value)));
    }
    map
}

/// `None` when the body is not well-formed multipart.
async fn decode_multipart(parts: Parts, bytes: Bytes) -> Option<Value> {
    // Original parts keep the boundary's case and the configured body limit.
    let request = Request::from_parts(parts, Body::from(bytes));
    let mut multipart = Multipart::from_request(request, &()).await.ok()?;
    let mut form_data = Map::new();
    let mut files = Map::new();
    while let Some(field) = multipart.next_field().await.ok()? {
        let name = storable_text(field.name().unwrap_or_default());
        if let Some(filename) = field.file_name() {
            files.entry(name).or_insert(json!({
                "filename": storable_text(filename),
                "content_type": field.content_type().map(storable_text),
            }));
        } else {
            let value = field.text().await.ok()?;
            form_data
                .entry(name)
                .or_insert(Value::String(storable_text(&value)));
        }
    }
    Some(json!({ "form_data": form_data, "files": files }))
}

/// Decode a request body by content-type family.
///
/// JSON that fails to parse is kept as `null`; malformed multipart and any
/// body that is neither JSON, form nor multipart is stored as text, or as a
/// byte-count placeholder when it is not UTF-8 or contains NUL.
pub async fn decode_body(request: Request) -> HttpResult<(BodyKind, Value)> {
    let content_type = content_type(request.headers());
    let (parts, body) = request.into_parts();
    let bytes = Bytes::from_request(Request::from_parts(parts.clone(), body), &())
        .await
        .map_err(IntoResponse::into_response)?;

    if content_type.contains("multipart/form-data") {
        return Ok(match decode_multipart(parts, bytes.clone()).await {
            Some(body) => (BodyKind::Multipart, body),
            None => text_or_binary(&bytes),
        });
    }
    if is_json(&content_type) {
        let body = serde_json::from_slice(&bytes)
            .map(storable_value)
            .unwrap_or(Value::Null);
        return Ok((BodyKind::Json, body));
    }
    if content_type.contains("application/x-www-form-urlencoded") {
        return Ok(match form_pairs(bytes.clone()).await {
            Some(pairs) => (BodyKind::Form, Value::Object(first_wins(pairs))),
            None => text_or_binary(&bytes),
        });
    }
    Ok(text_or_binary(&bytes))
}

/// Request data echoed back by the status renderers: parsed JSON for JSON
/// bodies, otherwise the text, and nothing for empty bodies or methods
/// without one.
pub fn received_data(method: &Method, headers: &HeaderMap, bytes: &[u8]) -> Option<Value> {
    if ![Method::POST, Method::PUT, Method::PATCH].contains(method) {
        return None;
    }
    let data = if is_json(&content_type(headers)) {
        serde_json::from_slice(bytes).unwrap_or(Value::Null)
    } else {
        Value::String(String::from_utf8_lossy(bytes).into_owned())
    };
    match &data {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Array(items) if items.is_empty() => None,
        _ => Some(data),
    }
}
