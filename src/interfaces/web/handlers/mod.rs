pub mod logs;
pub mod stream;
pub mod workflow;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::core::error::WorkflowError;

/// Maps the domain error taxonomy onto HTTP responses.
pub(crate) struct ApiError(pub WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub(crate) fn status(&self) -> StatusCode {
        match &self.0 {
            WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
            WorkflowError::Conflict { .. } | WorkflowError::InvalidState(_) => StatusCode::CONFLICT,
            WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
            WorkflowError::Collaborator(_) => StatusCode::BAD_GATEWAY,
            WorkflowError::Storage(_) | WorkflowError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = serde_json::json!({
            "success": false,
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

/// Serializes `body` as an object and marks it successful.
pub(crate) fn success<T: Serialize>(body: &T) -> ApiResult<Json<Value>> {
    let mut value = serde_json::to_value(body).map_err(WorkflowError::from)?;
    if let Value::Object(map) = &mut value {
        map.insert("success".to_string(), Value::Bool(true));
    }
    Ok(Json(value))
}
