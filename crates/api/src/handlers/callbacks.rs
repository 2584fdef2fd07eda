use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;
use pipeweave_application::{CallbackReport, CallbackStatus, FailureResolution};
use pipeweave_domain::{HeartbeatProgress, TaskCompletion};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackOutcome {
    pub run_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queued_downstream: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Worker结果回调：成功驱动下游入队，失败走重试或死信
pub async fn task_callback(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(report): Json<CallbackReport>,
) -> ApiResult<impl IntoResponse> {
    state.heartbeats.cancel_tracking(&run_id);

    match report.status {
        CallbackStatus::Success => {
            let completion = TaskCompletion {
                output_path: report.output_path.unwrap_or_default(),
                output_size: report.output_size,
                assets: report.assets,
                logs_path: report.logs_path,
            };
            let run = state.queue.mark_completed(&run_id, &completion).await?;
            let queued = state
                .executor
                .queue_downstream_tasks(&run_id, report.selected_next)
                .await?;
            info!(
                "运行 {} 完成回调处理完毕，下游入队 {} 条",
                run_id,
                queued.len()
            );
            Ok(success(CallbackOutcome {
                run_id,
                status: run.status.as_str().to_string(),
                queued_downstream: queued,
                resolution: None,
            }))
        }
        CallbackStatus::Failure => {
            let error = report.error.unwrap_or_else(|| "Task failed".to_string());
            let resolution = state
                .failure
                .handle_failure(&run_id, &error, report.error_code.as_deref())
                .await?;
            let (status, resolution) = match resolution {
                FailureResolution::Retried { attempt, .. } => {
                    ("pending".to_string(), format!("retried:attempt={attempt}"))
                }
                FailureResolution::DeadLettered { dlq_id } => {
                    ("failed".to_string(), format!("dead-lettered:{dlq_id}"))
                }
            };
            Ok(success(CallbackOutcome {
                run_id,
                status,
                queued_downstream: Vec::new(),
                resolution: Some(resolution),
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody {
    pub run_id: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatOutcome {
    pub alive: bool,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(body): Json<HeartbeatBody>,
) -> ApiResult<impl IntoResponse> {
    let progress = if body.progress.is_some() || body.message.is_some() {
        Some(HeartbeatProgress {
            percent: body.progress,
            message: body.message,
        })
    } else {
        None
    };
    let alive = state
        .heartbeats
        .record_heartbeat(&body.run_id, progress.as_ref())
        .await?;
    Ok(success(HeartbeatOutcome { alive }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    pub dispatched: usize,
}

/// tick 驱动模式：外部调度器触发一次调度循环体
pub async fn tick(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let dispatched = state.ticker.tick().await?;
    Ok(success(TickOutcome { dispatched }))
}
