use axum::extract::State;
use axum::response::IntoResponse;

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

pub async fn get_maintenance(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let current = state.maintenance.current().await?;
    Ok(success(current))
}

pub async fn request_maintenance(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let current = state.maintenance.request_maintenance().await?;
    Ok(success(current))
}

pub async fn enter_maintenance(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let current = state.maintenance.enter_maintenance().await?;
    Ok(success(current))
}

pub async fn exit_maintenance(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let current = state.maintenance.exit_maintenance().await?;
    Ok(success(current))
}
