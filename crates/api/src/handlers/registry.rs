use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;
use pipeweave_domain::ServiceRegistration;

/// 服务注册（维护模式下依然放行，注册不产生任务运行）
pub async fn register_service(
    State(state): State<AppState>,
    Json(registration): Json<ServiceRegistration>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.registry.register(registration).await?;
    Ok(success(outcome))
}

pub async fn list_services(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let services = state.registry.list_services().await?;
    Ok(success(services))
}
