use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::response::success;
use crate::routes::AppState;
use pipeweave_application::{PipelineUpsert, TriggerRequest};
use pipeweave_domain::{FailureMode, PipelineRunFilter};
use pipeweave_errors::OrchestratorError;

pub async fn upsert_pipeline(
    State(state): State<AppState>,
    Json(upsert): Json<PipelineUpsert>,
) -> ApiResult<impl IntoResponse> {
    if upsert.entry_tasks.is_empty() {
        return Err(ApiError::BadRequest("entryTasks 不能为空".to_string()));
    }
    let pipeline = state.executor.upsert_pipeline(upsert).await?;
    Ok(success(pipeline))
}

pub async fn list_pipelines(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let pipelines = state.executor.list_pipelines().await?;
    Ok(success(pipelines))
}

pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let pipeline = state
        .executor
        .get_pipeline(&id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(success(pipeline))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub failure_mode: Option<FailureMode>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_metadata() -> serde_json::Value {
    serde_json::json!({})
}

pub async fn trigger_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TriggerBody>,
) -> ApiResult<impl IntoResponse> {
    // 维护模式拒绝新任务准入，503
    if !state.maintenance.can_accept_tasks().await? {
        return Err(OrchestratorError::MaintenanceRejected.into());
    }

    let receipt = state
        .executor
        .trigger_pipeline(TriggerRequest {
            pipeline_id: id,
            input: body.input,
            failure_mode: body.failure_mode,
            priority: body.priority,
            metadata: body.metadata,
        })
        .await?;
    Ok(success(receipt))
}

pub async fn dry_run_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.executor.dry_run(&id).await?;
    Ok(success(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunQuery {
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list_pipeline_runs(
    State(state): State<AppState>,
    Query(query): Query<PipelineRunQuery>,
) -> ApiResult<impl IntoResponse> {
    let runs = state
        .pipeline_runs
        .list(&PipelineRunFilter {
            pipeline_id: query.pipeline_id,
            limit: query.limit.unwrap_or(50),
            offset: query.offset.unwrap_or(0),
        })
        .await?;
    Ok(success(runs))
}

pub async fn get_pipeline_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let run = state
        .pipeline_runs
        .get(&id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(success(run))
}
