use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use maestro_core::MaestroError;
use maestro_orchestrator::{
    profiles::catalog, Execution, ExecutionFilter, ExecutionStatus, Pattern, PatternInfo,
    TaskRequest,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Body of `POST /api/executions`.
#[derive(Debug, Deserialize)]
pub struct StartBody {
    /// Pattern name, e.g. `group_chat`.
    pub pattern: String,
    /// Free-text objective.
    pub task: String,
    /// Grouping label.
    #[serde(default, alias = "sessionId")]
    pub session_id: String,
    /// Pattern options.
    #[serde(default)]
    pub options: Value,
}

/// Query string of `GET /api/executions`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Status name.
    pub status: Option<String>,
    /// Pattern name.
    pub pattern: Option<String>,
    /// Session label.
    pub session_id: Option<String>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl ListQuery {
    fn into_filter(self) -> Result<ExecutionFilter, MaestroError> {
        Ok(ExecutionFilter {
            status: self
                .status
                .as_deref()
                .map(str::parse::<ExecutionStatus>)
                .transpose()?,
            pattern: self
                .pattern
                .as_deref()
                .map(str::parse::<Pattern>)
                .transpose()?,
            session_id: self.session_id,
            limit: self.limit,
        })
    }
}

/// Execution ids that do not parse cannot exist.
pub(crate) fn parse_id(raw: &str) -> Result<Uuid, MaestroError> {
    Uuid::parse_str(raw).map_err(|_| MaestroError::NotFound(format!("execution {raw}")))
}

/// `POST /api/executions`
pub async fn start_execution(
    State(state): State<Arc<AppState>>,
    body: Result<Json<StartBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(body) = body.map_err(|e| MaestroError::InvalidArgument(e.body_text()))?;
    let pattern: Pattern = body.pattern.parse()?;
    let request =
        TaskRequest::new(pattern, body.task, body.session_id).with_options(body.options);
    let id = state.orchestrator.start(request)?;
    info!(execution_id = %id, pattern = %pattern, "Execution accepted");
    Ok((StatusCode::ACCEPTED, Json(json!({ "execution_id": id }))))
}

/// `GET /api/executions/{id}`
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Execution>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.orchestrator.status(id)?))
}

/// `GET /api/executions`
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    let Query(query) = query.map_err(|e| MaestroError::InvalidArgument(e.body_text()))?;
    let filter = query.into_filter()?;
    Ok(Json(state.orchestrator.list(&filter)))
}

/// `POST /api/executions/{id}/cancel`
pub async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Execution>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.orchestrator.cancel(id)?))
}

/// `GET /api/patterns`
pub async fn list_patterns() -> Json<Vec<PatternInfo>> {
    Json(catalog())
}

/// `GET /api/metrics`
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.orchestrator.monitor().to_json().await)
}
