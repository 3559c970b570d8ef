//! Bearer authentication for the admin API and the cron endpoints.
//!
//! Admin tokens are random 32-byte hex strings; only the SHA-256 hash is
//! stored, so a database dump never leaks a usable credential. Cron
//! endpoints share one deployment secret compared in constant time.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use rand::Rng;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::api::AppState;
use crate::db::Principal;
use crate::error::ApiError;

/// Generate a random admin token (32 bytes, hex-encoded = 64 chars).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex_encode(&bytes)
}

/// SHA-256 hex digest, the storage form of a token.
pub fn hash_token(token: &str) -> String {
    hex_encode(&Sha256::digest(token.as_bytes()))
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the bearer token to an admin principal.
pub async fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Principal, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    let principal = state
        .store
        .get_principal_by_token_hash(&hash_token(token))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;
    if principal.role != "admin" {
        return Err(ApiError::Forbidden("admin role required".to_string()));
    }
    Ok(principal)
}

/// Validate the shared cron secret (constant-time comparison).
pub fn require_cron_secret(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let secret = state
        .config
        .cron_secret
        .as_ref()
        .ok_or_else(|| ApiError::Config("CRON_SECRET not configured".to_string()))?;
    let presented = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let matches: bool = secret
        .expose_secret()
        .as_bytes()
        .ct_eq(presented.as_bytes())
        .into();
    if !matches {
        return Err(ApiError::Unauthorized("invalid cron secret".to_string()));
    }
    Ok(())
}

/// Either the cron secret or an admin token. Used by the event fan-out
/// endpoint, which is hit by both machine publishers and the admin UI.
pub async fn require_admin_or_cron(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    if state.config.cron_secret.is_some() && require_cron_secret(state, headers).is_ok() {
        return Ok(());
    }
    require_admin(state, headers).await.map(|_| ())
}

/// Axum middleware guarding the admin routes. The resolved principal is
/// stashed in request extensions for handlers that stamp reviews.
///
/// Wire up with `axum::middleware::from_fn_with_state(state, admin_auth_middleware)`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = require_admin(&state, request.headers()).await?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Axum middleware guarding the cron routes.
pub async fn cron_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    require_cron_secret(&state, request.headers())?;
    Ok(next.run(request).await)
}
