//! Shared-secret authentication
//!
//! A credential is taken from, in order: the `api_key` query parameter, the
//! `_token` query parameter, or an `authorization: Bearer <secret>` header.
//! Only the first one present is compared against the configured secret.

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::GatewayConfig;

const BEARER_PREFIX: &str = "Bearer ";

/// Authentication middleware state
#[derive(Clone)]
pub struct AuthState {
    pub config: Arc<GatewayConfig>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &"Arc<GatewayConfig>")
            .finish()
    }
}

/// First non-empty value of `name`; later repeats of the key are ignored
fn first_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
}

/// Extract the credential a request carries, if any
#[must_use]
pub fn extract_credential(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    let params = Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map(|Query(params)| params)
        .unwrap_or_default();

    first_param(&params, "api_key")
        .or_else(|| first_param(&params, "_token"))
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix(BEARER_PREFIX))
                .map(str::to_string)
        })
}

/// Compare a presented credential with the configured secret
#[must_use]
pub fn credential_matches(presented: &str, secret: &str) -> bool {
    !secret.is_empty() && bool::from(presented.as_bytes().ct_eq(secret.as_bytes()))
}

/// Authentication middleware; runs before any other dispatch, health checks included
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = extract_credential(request.uri(), request.headers())
        .is_some_and(|credential| credential_matches(&credential, &auth_state.config.auth.api_key));

    if !authorized {
        warn!(path = %request.uri().path(), "Rejected request with missing or invalid credential");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    next.run(request).await
}
