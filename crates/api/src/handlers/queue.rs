use axum::extract::State;
use axum::response::IntoResponse;

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

pub async fn queue_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let status = state.queue.status().await?;
    Ok(success(status))
}
