use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pipeweave_errors::OrchestratorError;
use serde_json::json;

/// API错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("编排器错误: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::Orchestrator(err) => (orchestrator_status(err), self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
            "timestamp": chrono::Utc::now(),
        }));
        (status, body).into_response()
    }
}

fn orchestrator_status(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::TaskNotFound { .. }
        | OrchestratorError::TaskRunNotFound { .. }
        | OrchestratorError::ServiceNotFound { .. }
        | OrchestratorError::PipelineNotFound { .. }
        | OrchestratorError::PipelineRunNotFound { .. }
        | OrchestratorError::DlqEntryNotFound { .. } => StatusCode::NOT_FOUND,
        OrchestratorError::PipelineInvalid(_)
        | OrchestratorError::ValidationError(_)
        | OrchestratorError::Serialization(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::IllegalTransition { .. }
        | OrchestratorError::MaintenanceConflict(_)
        | OrchestratorError::Conflict(_) => StatusCode::CONFLICT,
        OrchestratorError::MaintenanceRejected => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            orchestrator_status(&OrchestratorError::task_not_found("t")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            orchestrator_status(&OrchestratorError::PipelineInvalid("cycle".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            orchestrator_status(&OrchestratorError::MaintenanceConflict("busy".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            orchestrator_status(&OrchestratorError::MaintenanceRejected),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            orchestrator_status(&OrchestratorError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
