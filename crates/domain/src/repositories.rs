//! 仓储抽象
//!
//! 数据访问接口，遵循依赖倒置原则。跨行的原子操作以单个方法呈现，
//! 由具体实现负责在一个事务内完成；隔离级别 read-committed 即可满足，
//! 进程内不使用额外锁。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    DlqEntry, HeartbeatProgress, IdempotencyEntry, MaintenanceMode, MaintenanceState, Pipeline,
    PipelineRun, PipelineRunStatus, QueueStatusSummary, RegistrationPlan, Service, TaskCodeHistory,
    TaskDefinition, TaskRun,
};
use crate::entities::AttemptRecord;
use pipeweave_errors::OrchestratorResult;

/// 服务仓储
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn get_service(&self, id: &str) -> OrchestratorResult<Option<Service>>;
    async fn list_services(&self) -> OrchestratorResult<Vec<Service>>;
    /// 原子落盘一次注册：服务行、任务定义、代码历史与孤儿任务的
    /// pending 运行取消，全部成功或全部回滚。
    async fn apply_registration(&self, plan: &RegistrationPlan) -> OrchestratorResult<()>;
}

/// 任务定义仓储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_task(&self, id: &str) -> OrchestratorResult<Option<TaskDefinition>>;
    async fn get_tasks(&self, ids: &[String]) -> OrchestratorResult<Vec<TaskDefinition>>;
    async fn list_for_service(&self, service_id: &str) -> OrchestratorResult<Vec<TaskDefinition>>;
    async fn code_history(&self, task_id: &str) -> OrchestratorResult<Vec<TaskCodeHistory>>;
}

/// 流水线定义仓储
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    async fn put(&self, pipeline: &Pipeline) -> OrchestratorResult<()>;
    async fn get(&self, id: &str) -> OrchestratorResult<Option<Pipeline>>;
    async fn list(&self) -> OrchestratorResult<Vec<Pipeline>>;
}

/// 流水线运行查询条件
#[derive(Debug, Clone, Default)]
pub struct PipelineRunFilter {
    pub pipeline_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// 流水线运行仓储
#[async_trait]
pub trait PipelineRunRepository: Send + Sync {
    /// 在一个事务内创建运行实例与其入口任务运行，
    /// 避免出现没有入口任务的流水线运行。
    async fn create_with_tasks(
        &self,
        run: &PipelineRun,
        task_runs: &[TaskRun],
    ) -> OrchestratorResult<()>;
    async fn get(&self, id: &str) -> OrchestratorResult<Option<PipelineRun>>;
    async fn list(&self, filter: &PipelineRunFilter) -> OrchestratorResult<Vec<PipelineRun>>;
    async fn set_status(
        &self,
        id: &str,
        status: PipelineRunStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> OrchestratorResult<()>;
}

/// 任务完成时的产物信息
#[derive(Debug, Clone, Default)]
pub struct TaskCompletion {
    pub output_path: String,
    pub output_size: Option<i64>,
    pub assets: Option<serde_json::Value>,
    pub logs_path: Option<String>,
}

/// 任务运行仓储
#[async_trait]
pub trait TaskRunRepository: Send + Sync {
    async fn insert(&self, run: &TaskRun) -> OrchestratorResult<()>;
    async fn get(&self, id: &str) -> OrchestratorResult<Option<TaskRun>>;

    /// 领取可调度的 pending 运行：`scheduled_for` 已到期、
    /// 所属任务 running 数小于并发上限（0 表示不限制），
    /// 按 (priority ASC, created_at ASC) 排序，至多 `limit` 条。
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> OrchestratorResult<Vec<TaskRun>>;

    /// pending → running；守卫失败返回 IllegalTransition
    async fn mark_running(&self, id: &str, now: DateTime<Utc>) -> OrchestratorResult<TaskRun>;
    /// running → completed
    async fn mark_completed(
        &self,
        id: &str,
        completion: &TaskCompletion,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<TaskRun>;
    /// running → failed；已超时的行保持 timeout，只补写错误字段
    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        error_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<TaskRun>;
    /// running → timeout；仅在仍然 running 时生效，否则返回 None
    async fn mark_timed_out(
        &self,
        id: &str,
        error: &str,
        error_code: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<TaskRun>>;

    /// 原子重试重置：status=pending、attempt+1、scheduled_for=run_at、
    /// 清空错误字段并把本次失败追加到 previous_attempts
    async fn schedule_retry(
        &self,
        id: &str,
        record: &AttemptRecord,
        next_attempt: i32,
        run_at: DateTime<Utc>,
    ) -> OrchestratorResult<()>;

    /// 写入心跳时间与进度补丁；运行不处于 running 时返回 false
    async fn record_heartbeat(
        &self,
        id: &str,
        progress: Option<&HeartbeatProgress>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<bool>;

    async fn cancel_pending_for_pipeline(
        &self,
        pipeline_run_id: &str,
        error: &str,
    ) -> OrchestratorResult<u64>;

    async fn count_running_for_task(&self, task_id: &str) -> OrchestratorResult<i64>;
    async fn counts(&self) -> OrchestratorResult<QueueStatusSummary>;

    async fn list_for_pipeline(&self, pipeline_run_id: &str) -> OrchestratorResult<Vec<TaskRun>>;
    /// 该流水线运行中某任务最近一次 completed 的运行
    async fn latest_completed(
        &self,
        pipeline_run_id: &str,
        task_id: &str,
    ) -> OrchestratorResult<Option<TaskRun>>;
    /// 该流水线运行中某任务是否存在未终态的运行（join 去重守卫）
    async fn active_run_exists(
        &self,
        pipeline_run_id: &str,
        task_id: &str,
    ) -> OrchestratorResult<bool>;

    /// 心跳超期仍处于 running 的运行（重启恢复扫描）
    async fn find_stale_running(&self, now: DateTime<Utc>) -> OrchestratorResult<Vec<TaskRun>>;
}

/// 死信仓储
#[async_trait]
pub trait DlqRepository: Send + Sync {
    async fn insert(&self, entry: &DlqEntry) -> OrchestratorResult<()>;
    async fn get(&self, id: &str) -> OrchestratorResult<Option<DlqEntry>>;
    /// 未重放的记录，按 failed_at 倒序
    async fn list_unretried(&self, limit: i64, offset: i64) -> OrchestratorResult<Vec<DlqEntry>>;
    async fn mark_retried(
        &self,
        id: &str,
        retry_run_id: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()>;
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> OrchestratorResult<u64>;
    async fn count_unretried(&self) -> OrchestratorResult<i64>;
}

/// 幂等缓存仓储
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// 未过期的缓存命中
    async fn find_live(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<IdempotencyEntry>>;
    async fn upsert(&self, entry: &IdempotencyEntry) -> OrchestratorResult<()>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> OrchestratorResult<u64>;
}

/// 维护状态仓储（单例行）
#[async_trait]
pub trait MaintenanceRepository: Send + Sync {
    /// 读取当前状态；不存在时落盘并返回 running 默认值
    async fn load(&self, now: DateTime<Utc>) -> OrchestratorResult<MaintenanceState>;
    /// 比较并交换：仅当当前模式为 `from` 时切换到 `to`，返回是否成功
    async fn transition(
        &self,
        from: MaintenanceMode,
        to: MaintenanceMode,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<bool>;
}
