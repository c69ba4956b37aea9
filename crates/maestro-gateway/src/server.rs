use crate::middleware::{auth_middleware, AuthConfig};
use crate::router::{
    cancel_execution, get_execution, list_executions, list_patterns, metrics, start_execution,
};
use crate::stream::stream_execution;
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Json, Router,
};
use maestro_orchestrator::Orchestrator;
use serde_json::{json, Value};
use std::sync::Arc;

/// State shared by every handler.
pub struct AppState {
    /// The orchestrator behind the API.
    pub orchestrator: Arc<Orchestrator>,
}

/// Builds the gateway router.
pub struct GatewayServer;

impl GatewayServer {
    /// Gateway without authentication.
    pub fn build(orchestrator: Arc<Orchestrator>) -> Router {
        Self::build_with_auth(orchestrator, AuthConfig::default())
    }

    /// Gateway whose `/api` routes require one of `auth`'s keys when any
    /// are configured. `/health` stays open.
    pub fn build_with_auth(orchestrator: Arc<Orchestrator>, auth: AuthConfig) -> Router {
        let state = Arc::new(AppState { orchestrator });

        let api = Router::new()
            .route("/executions", post(start_execution).get(list_executions))
            .route("/executions/{id}", get(get_execution))
            .route("/executions/{id}/cancel", post(cancel_execution))
            .route("/executions/{id}/stream", get(stream_execution))
            .route("/patterns", get(list_patterns))
            .route("/metrics", get(metrics))
            .route_layer(axum_mw::from_fn_with_state(Arc::new(auth), auth_middleware));

        Router::new()
            .nest("/api", api)
            .route("/health", get(health_handler))
            .with_state(state)
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok", "service": "maestro"}))
}
