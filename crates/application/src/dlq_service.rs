//! 死信队列
//!
//! 重试耗尽的任务运行在这里落档，保留输入路径、上游引用和完整的
//! 尝试历史，支持人工检视与重放。

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::queue_service::{EnqueueReceipt, EnqueueRequest, QueueService};
use pipeweave_domain::{ids, DlqEntry, DlqRepository, TaskRun};
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

pub struct DeadLetterService {
    dlq: Arc<dyn DlqRepository>,
    queue: Arc<QueueService>,
}

impl DeadLetterService {
    pub fn new(dlq: Arc<dyn DlqRepository>, queue: Arc<QueueService>) -> Self {
        Self { dlq, queue }
    }

    /// 归档一条重试耗尽的运行，返回死信ID
    pub async fn add(&self, run: &TaskRun, error: &str) -> OrchestratorResult<String> {
        let entry = DlqEntry {
            id: ids::dlq_entry_id(),
            task_run_id: run.id.clone(),
            task_id: run.task_id.clone(),
            pipeline_run_id: run.pipeline_run_id.clone(),
            code_version: run.code_version,
            code_hash: run.code_hash.clone(),
            error: error.to_string(),
            attempts: run.attempt,
            input_path: run.input_path.clone(),
            upstream_refs: run.upstream_refs.clone(),
            previous_attempts: run.previous_attempts.clone(),
            failed_at: Utc::now(),
            retried_at: None,
            retry_run_id: None,
        };
        self.dlq.insert(&entry).await?;
        warn!(
            "任务运行 {} 进入死信队列: dlq={} attempts={} error={}",
            run.id, entry.id, run.attempt, error
        );
        Ok(entry.id)
    }

    /// 未重放的死信，按失败时间倒序
    pub async fn list(&self, limit: i64, offset: i64) -> OrchestratorResult<Vec<DlqEntry>> {
        self.dlq.list_unretried(limit, offset).await
    }

    pub async fn get(&self, id: &str) -> OrchestratorResult<Option<DlqEntry>> {
        self.dlq.get(id).await
    }

    /// 人工重放：以原始输入与上游引用重新入队，并记录重放关系
    pub async fn retry(&self, dlq_id: &str) -> OrchestratorResult<EnqueueReceipt> {
        let entry = self
            .dlq
            .get(dlq_id)
            .await?
            .ok_or_else(|| OrchestratorError::DlqEntryNotFound {
                id: dlq_id.to_string(),
            })?;
        if entry.retried_at.is_some() {
            return Err(OrchestratorError::Conflict(format!(
                "死信记录 {dlq_id} 已经重放过"
            )));
        }

        let mut request = EnqueueRequest::new(&entry.task_id);
        request.pipeline_run_id = entry.pipeline_run_id.clone();
        request.upstream_refs = entry.upstream_refs.clone();
        request.input_path_override = Some(entry.input_path.clone());
        let receipt = self.queue.enqueue(request).await?;

        self.dlq
            .mark_retried(dlq_id, &receipt.run_id, Utc::now())
            .await?;
        info!(
            "死信 {} 已重放为新运行 {}: task={}",
            dlq_id, receipt.run_id, entry.task_id
        );
        Ok(receipt)
    }

    /// 删除超过保留期的死信
    pub async fn purge(&self, retention_days: i64) -> OrchestratorResult<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let removed = self.dlq.purge_before(cutoff).await?;
        if removed > 0 {
            info!("清理了 {} 条超过 {} 天的死信", removed, retention_days);
        }
        Ok(removed)
    }
}
