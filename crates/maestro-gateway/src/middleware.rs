use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// API keys accepted on `/api` routes. No keys means no auth.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Accepted keys.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// Accept exactly `api_keys`.
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// True when at least one key is configured.
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    fn accepts(&self, key: &str) -> bool {
        self.api_keys.iter().any(|k| k == key)
    }
}

/// `?api_key=` query parameter, for clients that cannot set headers
/// (browser WebSockets).
#[derive(Deserialize, Default)]
pub struct AuthQuery {
    /// Key passed in the query string.
    pub api_key: Option<String>,
}

/// Checks `Authorization: Bearer <key>` first, then `?api_key=<key>`.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() {
        return next.run(request).await;
    }

    let key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or(query.api_key);

    let message = match key {
        Some(k) if auth.accepts(&k) => return next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request: invalid API key");
            "invalid API key"
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request: missing API key");
            "API key required"
        }
    };
    let body = json!({"error": {"category": "unauthorized", "message": message}});
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
