use axum::extract::FromRef;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use std::net::SocketAddr;

use crate::error::ApiError;

pub mod send;
pub mod status;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

pub fn router(state: AppState) -> Router {
    // Wrong-method requests must carry the same JSON error envelope as every
    // other failure, so each method router gets an explicit 405 fallback.
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/send",
            post(send::send_email).fallback(|| async { ApiError::MethodNotAllowed("POST") }),
        )
        .route(
            "/status",
            get(status::message_status).fallback(|| async { ApiError::MethodNotAllowed("GET") }),
        )
        .with_state(state)
}

/// Pulls the `prefix.secret` token out of `Authorization: Bearer ...`.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(ApiError::MissingAuthorization)?
        .to_str()
        .map_err(|_| ApiError::InvalidTokenFormat)?;
    raw.strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::InvalidTokenFormat)
}

/// Real client IP, preferring proxy headers over the socket peer.
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    for key in ["cf-connecting-ip", "x-real-ip"] {
        if let Some(v) = headers.get(key).and_then(|v| v.to_str().ok()) {
            let v = v.trim();
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    // X-Forwarded-For may hold a chain; the client is the first entry.
    if let Some(v) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = v.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

pub(crate) fn fmt_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
