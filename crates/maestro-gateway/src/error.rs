use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use maestro_core::{ErrorCategory, MaestroError};
use serde_json::json;
use tracing::error;

/// A [`MaestroError`] on its way out as `{"error": {category, message}}`.
#[derive(Debug)]
pub struct ApiError(pub MaestroError);

impl ApiError {
    /// HTTP status for the error's category.
    pub fn status(&self) -> StatusCode {
        match self.0.category() {
            ErrorCategory::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Cancelled => StatusCode::CONFLICT,
            ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCategory::AgentInvocation => StatusCode::BAD_GATEWAY,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MaestroError> for ApiError {
    fn from(err: MaestroError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = json!({
            "error": {
                "category": self.0.category(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
