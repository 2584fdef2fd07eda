use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::ApiResult;
use crate::routes::AppState;
use pipeweave_domain::MaintenanceMode;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub can_accept_tasks: bool,
    pub maintenance_mode: MaintenanceMode,
    pub running_tasks: i64,
}

pub async fn health_check(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let maintenance = state.maintenance.current().await?;
    let queue = state.queue.status().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        can_accept_tasks: maintenance.mode == MaintenanceMode::Running,
        maintenance_mode: maintenance.mode,
        running_tasks: queue.running,
    }))
}
