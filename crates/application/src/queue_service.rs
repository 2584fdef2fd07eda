//! 任务队列
//!
//! 入队、领取与状态迁移。入队走幂等缓存快路径；领取由仓储的
//! 单条SQL完成并发上限与调度时间过滤；完成/失败驱动维护钩子。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::idempotency_service::{CacheStoreRequest, IdempotencyService};
use crate::maintenance_service::MaintenanceService;
use pipeweave_domain::{
    ids, DlqRepository, QueueStatusSummary, TaskCompletion, TaskRepository, TaskRun,
    TaskRunRepository, TaskRunStatus, UpstreamRef,
};
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

/// 入队请求
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub task_id: String,
    /// 输入负载本身由调用方写入Blob存储，核心只记录路径
    pub input: serde_json::Value,
    pub pipeline_run_id: Option<String>,
    pub priority: Option<i32>,
    pub upstream_refs: HashMap<String, UpstreamRef>,
    pub metadata: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    /// 死信重放时复用原始输入路径
    pub input_path_override: Option<String>,
}

impl EnqueueRequest {
    pub fn new<S: Into<String>>(task_id: S) -> Self {
        Self {
            task_id: task_id.into(),
            input: serde_json::Value::Null,
            pipeline_run_id: None,
            priority: None,
            upstream_refs: HashMap::new(),
            metadata: serde_json::json!({}),
            idempotency_key: None,
            scheduled_for: None,
            input_path_override: None,
        }
    }
}

/// 入队回执
#[derive(Debug, Clone)]
pub struct EnqueueReceipt {
    pub run_id: String,
    pub task_id: String,
    pub status: TaskRunStatus,
    pub input_path: String,
    /// true 表示命中幂等缓存，没有插入新运行
    pub deduplicated: bool,
}

pub struct QueueService {
    tasks: Arc<dyn TaskRepository>,
    task_runs: Arc<dyn TaskRunRepository>,
    dlq: Arc<dyn DlqRepository>,
    idempotency: Arc<IdempotencyService>,
    maintenance: Arc<MaintenanceService>,
    default_idempotency_ttl_sec: i64,
}

impl QueueService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        task_runs: Arc<dyn TaskRunRepository>,
        dlq: Arc<dyn DlqRepository>,
        idempotency: Arc<IdempotencyService>,
        maintenance: Arc<MaintenanceService>,
        default_idempotency_ttl_sec: i64,
    ) -> Self {
        Self {
            tasks,
            task_runs,
            dlq,
            idempotency,
            maintenance,
            default_idempotency_ttl_sec,
        }
    }

    /// 入队一个任务运行
    ///
    /// 携带幂等key且缓存未过期时直接返回缓存产物，不插入新行，
    /// 这是重试场景下 exactly-once 的快路径。
    pub async fn enqueue(&self, request: EnqueueRequest) -> OrchestratorResult<EnqueueReceipt> {
        if let Some(key) = &request.idempotency_key {
            if let Some(hit) = self.idempotency.lookup(key).await? {
                info!(
                    "幂等缓存命中，复用运行 {} 的产物: key={}",
                    hit.task_run_id, key
                );
                return Ok(EnqueueReceipt {
                    run_id: hit.task_run_id,
                    task_id: request.task_id,
                    status: TaskRunStatus::Completed,
                    input_path: hit.output_path,
                    deduplicated: true,
                });
            }
        }

        let run = self.prepare_run(&request).await?;
        self.task_runs.insert(&run).await?;
        debug!("任务运行 {} 已入队: task={}", run.id, run.task_id);

        Ok(EnqueueReceipt {
            run_id: run.id,
            task_id: run.task_id,
            status: run.status,
            input_path: run.input_path,
            deduplicated: false,
        })
    }

    /// 按输入顺序逐项入队；不要求全或无
    pub async fn enqueue_batch(
        &self,
        requests: Vec<EnqueueRequest>,
    ) -> OrchestratorResult<Vec<EnqueueReceipt>> {
        let mut receipts = Vec::with_capacity(requests.len());
        for request in requests {
            receipts.push(self.enqueue(request).await?);
        }
        Ok(receipts)
    }

    /// 组装一条 pending 运行但不落盘
    ///
    /// 触发流水线时由执行器把入口运行与流水线运行放进同一个事务。
    pub async fn prepare_run(&self, request: &EnqueueRequest) -> OrchestratorResult<TaskRun> {
        let def = self
            .tasks
            .get_task(&request.task_id)
            .await?
            .ok_or_else(|| OrchestratorError::task_not_found(&request.task_id))?;

        let run_id = ids::task_run_id();
        let input_path = match &request.input_path_override {
            Some(path) => path.clone(),
            None => match &request.pipeline_run_id {
                Some(prun) => format!("runs/{prun}/tasks/{run_id}/input.json"),
                None => format!("standalone/{run_id}/input.json"),
            },
        };

        Ok(TaskRun {
            id: run_id,
            task_id: def.id.clone(),
            pipeline_run_id: request.pipeline_run_id.clone(),
            status: TaskRunStatus::Pending,
            code_version: def.code_version,
            code_hash: def.code_hash.clone(),
            attempt: 1,
            max_retries: def.max_retries,
            priority: request.priority.unwrap_or(def.priority),
            input_path,
            output_path: None,
            output_size: None,
            assets: None,
            upstream_refs: request.upstream_refs.clone(),
            previous_attempts: Vec::new(),
            idempotency_key: request.idempotency_key.clone(),
            scheduled_for: request.scheduled_for,
            heartbeat_at: None,
            started_at: None,
            completed_at: None,
            error: None,
            error_code: None,
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
        })
    }

    /// 领取至多 `limit` 条可分发的运行
    pub async fn get_next(&self, limit: i64) -> OrchestratorResult<Vec<TaskRun>> {
        self.task_runs.claim_due(Utc::now(), limit).await
    }

    pub async fn get_run(&self, run_id: &str) -> OrchestratorResult<Option<TaskRun>> {
        self.task_runs.get(run_id).await
    }

    /// pending → running
    pub async fn mark_running(&self, run_id: &str) -> OrchestratorResult<TaskRun> {
        self.task_runs.mark_running(run_id, Utc::now()).await
    }

    /// running → completed；写入幂等缓存并触发维护钩子
    pub async fn mark_completed(
        &self,
        run_id: &str,
        completion: &TaskCompletion,
    ) -> OrchestratorResult<TaskRun> {
        let run = self
            .task_runs
            .mark_completed(run_id, completion, Utc::now())
            .await?;

        if let Some(key) = &run.idempotency_key {
            match self.tasks.get_task(&run.task_id).await? {
                Some(def) => {
                    let ttl = def
                        .idempotency_ttl_sec
                        .unwrap_or(self.default_idempotency_ttl_sec);
                    self.idempotency
                        .store(CacheStoreRequest {
                            key: key.clone(),
                            task_id: run.task_id.clone(),
                            task_run_id: run.id.clone(),
                            code_version: run.code_version,
                            output_path: completion.output_path.clone(),
                            ttl_sec: ttl,
                            output_size: completion.output_size,
                            assets: completion.assets.clone(),
                        })
                        .await?;
                }
                None => warn!(
                    "任务 {} 定义已不存在，跳过幂等缓存写入: run={}",
                    run.task_id, run.id
                ),
            }
        }

        self.maintenance.on_task_status_change().await?;
        Ok(run)
    }

    /// running → failed（已超时的行保持 timeout）；触发维护钩子
    pub async fn mark_failed(
        &self,
        run_id: &str,
        error: &str,
        error_code: Option<&str>,
    ) -> OrchestratorResult<TaskRun> {
        let run = self
            .task_runs
            .mark_failed(run_id, error, error_code, Utc::now())
            .await?;
        self.maintenance.on_task_status_change().await?;
        Ok(run)
    }

    /// 按状态聚合的队列概览，附带死信深度
    pub async fn status(&self) -> OrchestratorResult<QueueStatusSummary> {
        let mut summary = self.task_runs.counts().await?;
        summary.dlq = self.dlq.count_unretried().await?;
        Ok(summary)
    }

    /// 即席调度用的并发检查
    pub async fn can_run_task(&self, task_id: &str) -> OrchestratorResult<bool> {
        let def = self
            .tasks
            .get_task(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::task_not_found(task_id))?;
        if def.concurrency == 0 {
            return Ok(true);
        }
        let running = self.task_runs.count_running_for_task(task_id).await?;
        Ok(running < def.concurrency as i64)
    }
}
