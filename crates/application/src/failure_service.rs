//! 任务失败路径
//!
//! Worker上报失败、分发失败与心跳超时共用的收口：重试预算内
//! 调度重试，否则落死信、标记终态失败并驱动流水线的失败处理。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::dlq_service::DeadLetterService;
use crate::pipeline_executor::PipelineExecutor;
use crate::queue_service::QueueService;
use crate::retry_service::{RetryOutcome, RetryService};
use pipeweave_domain::{TaskRepository, TaskRunRepository, TaskRunStatus};
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

/// 失败处理结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureResolution {
    /// 已调度重试
    Retried { run_at: DateTime<Utc>, attempt: i32 },
    /// 重试耗尽，已进入死信
    DeadLettered { dlq_id: String },
}

pub struct TaskFailureService {
    tasks: Arc<dyn TaskRepository>,
    task_runs: Arc<dyn TaskRunRepository>,
    retry: Arc<RetryService>,
    dlq: Arc<DeadLetterService>,
    queue: Arc<QueueService>,
    executor: Arc<PipelineExecutor>,
}

impl TaskFailureService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        task_runs: Arc<dyn TaskRunRepository>,
        retry: Arc<RetryService>,
        dlq: Arc<DeadLetterService>,
        queue: Arc<QueueService>,
        executor: Arc<PipelineExecutor>,
    ) -> Self {
        Self {
            tasks,
            task_runs,
            retry,
            dlq,
            queue,
            executor,
        }
    }

    /// 处理一次任务失败（Worker上报、分发错误或心跳超时）
    pub async fn handle_failure(
        &self,
        run_id: &str,
        error_message: &str,
        error_code: Option<&str>,
    ) -> OrchestratorResult<FailureResolution> {
        let run = self
            .task_runs
            .get(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::task_run_not_found(run_id))?;

        // 迟到的失败上报：运行已经被别的路径收口（完成、取消或已判失败）
        if !matches!(run.status, TaskRunStatus::Running | TaskRunStatus::Timeout) {
            return Err(OrchestratorError::Conflict(format!(
                "运行 {} 已处于 {} 状态，失败上报被忽略",
                run_id,
                run.status.as_str()
            )));
        }

        // 孤儿任务（定义已被移除）没有重试配置，直接耗尽
        if let Some(def) = self.tasks.get_task(&run.task_id).await? {
            match self
                .retry
                .schedule_retry(&run, &def, error_message, error_code)
                .await?
            {
                RetryOutcome::Scheduled {
                    run_at,
                    next_attempt,
                } => {
                    return Ok(FailureResolution::Retried {
                        run_at,
                        attempt: next_attempt,
                    });
                }
                RetryOutcome::Exhausted => {}
            }
        } else {
            error!(
                "任务 {} 定义不存在，运行 {} 直接进入死信",
                run.task_id, run_id
            );
        }

        let dlq_id = self.dlq.add(&run, error_message).await?;
        let failed_run = self
            .queue
            .mark_failed(run_id, error_message, error_code)
            .await?;
        self.executor.handle_task_failure(&failed_run).await?;

        info!(
            "任务运行 {} 重试耗尽: dlq={} error_code={:?}",
            run_id, dlq_id, error_code
        );
        Ok(FailureResolution::DeadLettered { dlq_id })
    }
}
