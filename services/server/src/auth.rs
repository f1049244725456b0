use crate::http::response::{internal_error, unauthorized};
use crate::model::OwnerId;
use crate::state::AppState;
use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::warn;

/// sha256 of a raw bearer token, as stored in `api_tokens.token_hash`.
pub fn hash_token(raw_token: &str) -> Vec<u8> {
    Sha256::digest(raw_token.as_bytes()).to_vec()
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Token from the `Authorization` header, falling back to `?access_token=`
/// for clients such as `EventSource` that cannot set headers.
fn token_from_parts(parts: &Parts) -> Option<String> {
    if let Some(token) = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer)
    {
        return Some(token.to_owned());
    }
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri).ok()?;
    pairs
        .into_iter()
        .find(|(key, value)| key == "access_token" && !value.is_empty())
        .map(|(_, value)| value)
}

/// The authenticated owner of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal(pub OwnerId);

impl FromRequestParts<AppState> for Principal {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = token_from_parts(parts) else {
            return Err(unauthorized("missing bearer token"));
        };
        match state.accounts.resolve_token_hash(&hash_token(&token)).await {
            Ok(Some(owner_id)) => Ok(Principal(owner_id)),
            Ok(None) => {
                warn!(path = %parts.uri.path(), "rejected invalid or revoked token");
                Err(unauthorized("invalid token"))
            }
            Err(err) => Err(internal_error(err)),
        }
    }
}
