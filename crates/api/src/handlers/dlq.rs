use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct DlqQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list_dlq(
    State(state): State<AppState>,
    Query(query): Query<DlqQuery>,
) -> ApiResult<impl IntoResponse> {
    let entries = state
        .dlq
        .list(query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(success(entries))
}

pub async fn retry_dlq_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let receipt = state.dlq.retry(&id).await?;
    Ok(success(serde_json::json!({
        "dlqId": id,
        "runId": receipt.run_id,
        "taskId": receipt.task_id,
        "status": receipt.status,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeBody {
    #[serde(default)]
    pub retention_days: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeOutcome {
    pub purged: u64,
    pub retention_days: i64,
}

pub async fn purge_dlq(
    State(state): State<AppState>,
    Json(body): Json<PurgeBody>,
) -> ApiResult<impl IntoResponse> {
    let retention_days = body.retention_days.unwrap_or(state.dlq_retention_days);
    let purged = state.dlq.purge(retention_days).await?;
    Ok(success(PurgeOutcome {
        purged,
        retention_days,
    }))
}
