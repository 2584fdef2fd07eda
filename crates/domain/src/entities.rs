//! 领域实体
//!
//! 编排器的核心业务模型：服务、任务定义、流水线、运行实例、死信与维护状态。
//! 状态枚举的数据库编码与其对外JSON表示保持同一套字符串。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// 服务与任务定义
// ============================================================================

/// 已注册的Worker服务
///
/// 每次注册都会整体覆盖服务行；任务定义归属于唯一的服务。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub version: String,
    pub base_url: String,
    pub status: ServiceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// 服务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    Inactive,
    #[serde(rename = "disconnected")]
    Disconnected,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Disconnected => "disconnected",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for ServiceStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ServiceStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "active" => Ok(ServiceStatus::Active),
            "inactive" => Ok(ServiceStatus::Inactive),
            "disconnected" => Ok(ServiceStatus::Disconnected),
            _ => Err(format!("Invalid service status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ServiceStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 重试退避策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RetryBackoff {
    #[serde(rename = "fixed")]
    Fixed,
    #[serde(rename = "exponential")]
    Exponential,
}

impl RetryBackoff {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryBackoff::Fixed => "fixed",
            RetryBackoff::Exponential => "exponential",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for RetryBackoff {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for RetryBackoff {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "fixed" => Ok(RetryBackoff::Fixed),
            "exponential" => Ok(RetryBackoff::Exponential),
            _ => Err(format!("Invalid retry backoff: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for RetryBackoff {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 任务定义
///
/// 任务ID全局唯一；`code_hash` 是任务配置规范化序列化后的摘要前缀，
/// `code_version` 在摘要变化时单调递增。`allowed_next` 允许引用尚未注册的
/// 任务，引用有效性在流水线校验时检查。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub id: String,
    pub service_id: String,
    pub code_hash: String,
    pub code_version: i32,
    pub allowed_next: Vec<String>,
    pub timeout_sec: i32,
    pub max_retries: i32,
    pub retry_backoff: RetryBackoff,
    pub retry_delay_ms: i64,
    pub max_retry_delay_ms: i64,
    pub heartbeat_interval_ms: i64,
    /// 0 表示不限制并发
    pub concurrency: i32,
    /// 数值越小优先级越高
    pub priority: i32,
    pub idempotency_ttl_sec: Option<i64>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskDefinition {
    /// 检查给定的程序化路由选择是否在声明的后继里
    pub fn allows_next(&self, task_id: &str) -> bool {
        self.allowed_next.iter().any(|t| t == task_id)
    }
}

/// 任务代码版本历史（仅追加，每个 (task_id, code_hash) 一行）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCodeHistory {
    pub task_id: String,
    pub code_version: i32,
    pub code_hash: String,
    pub service_version: String,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// 注册输入
// ============================================================================

/// 服务注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    pub service_id: String,
    pub version: String,
    pub base_url: String,
    pub tasks: Vec<TaskSpec>,
}

/// 注册时提交的任务配置
///
/// 该结构的JSON序列化（字段顺序即声明顺序）就是代码摘要的规范化形式，
/// 修改字段顺序或默认值会使所有已存在的摘要失效。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub id: String,
    #[serde(default)]
    pub allowed_next: Vec<String>,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: i32,
    #[serde(default)]
    pub max_retries: i32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: RetryBackoff,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: i64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: i64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: i64,
    #[serde(default)]
    pub concurrency: i32,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub idempotency_ttl_sec: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_timeout_sec() -> i32 {
    300
}
fn default_retry_backoff() -> RetryBackoff {
    RetryBackoff::Exponential
}
fn default_retry_delay_ms() -> i64 {
    1_000
}
fn default_max_retry_delay_ms() -> i64 {
    60_000
}
fn default_heartbeat_interval_ms() -> i64 {
    30_000
}
fn default_priority() -> i32 {
    100
}

/// 注册产生的单个代码变更
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    pub task_id: String,
    pub old_version: Option<i32>,
    pub new_version: i32,
    pub code_hash: String,
}

/// 一次注册的写入计划：应用层先读后算，仓储原子落盘
#[derive(Debug, Clone)]
pub struct RegistrationPlan {
    pub service: Service,
    pub tasks: Vec<TaskDefinition>,
    pub history: Vec<TaskCodeHistory>,
    pub orphaned_task_ids: Vec<String>,
    /// 孤儿任务待取消的 pending 运行所使用的错误文案
    pub orphan_error: String,
}

/// 注册结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOutcome {
    pub code_changes: Vec<CodeChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphaned_tasks: Option<Vec<String>>,
}

// ============================================================================
// 流水线
// ============================================================================

/// 流水线结构：任务ID到其声明后继的映射
pub type PipelineStructure = HashMap<String, PipelineNode>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    #[serde(default)]
    pub allowed_next: Vec<String>,
}

/// 失败模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureMode {
    #[serde(rename = "fail-fast")]
    FailFast,
    #[serde(rename = "continue")]
    Continue,
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::FailFast => "fail-fast",
            FailureMode::Continue => "continue",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for FailureMode {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for FailureMode {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "fail-fast" => Ok(FailureMode::FailFast),
            "continue" => Ok(FailureMode::Continue),
            _ => Err(format!("Invalid failure mode: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for FailureMode {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 流水线定义
///
/// `structure` 是在 upsert 时拍下的快照，触发运行时再次冻结到运行实例上。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub entry_tasks: Vec<String>,
    pub structure: PipelineStructure,
    pub version: i32,
    pub failure_mode: FailureMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 流水线运行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipelineRunStatus {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl PipelineRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineRunStatus::Running => "running",
            PipelineRunStatus::Completed => "completed",
            PipelineRunStatus::Failed => "failed",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for PipelineRunStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for PipelineRunStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "running" => Ok(PipelineRunStatus::Running),
            "completed" => Ok(PipelineRunStatus::Completed),
            "failed" => Ok(PipelineRunStatus::Failed),
            _ => Err(format!("Invalid pipeline run status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for PipelineRunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 流水线运行实例
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub id: String,
    pub pipeline_id: String,
    pub pipeline_version: i32,
    pub structure_snapshot: PipelineStructure,
    pub status: PipelineRunStatus,
    pub input_path: String,
    pub failure_mode: FailureMode,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl PipelineRun {
    pub fn is_finished(&self) -> bool {
        !matches!(self.status, PipelineRunStatus::Running)
    }
}

// ============================================================================
// 任务运行实例
// ============================================================================

/// 任务运行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskRunStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl TaskRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunStatus::Pending => "pending",
            TaskRunStatus::Running => "running",
            TaskRunStatus::Waiting => "waiting",
            TaskRunStatus::Completed => "completed",
            TaskRunStatus::Failed => "failed",
            TaskRunStatus::Timeout => "timeout",
            TaskRunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskRunStatus::Completed
                | TaskRunStatus::Failed
                | TaskRunStatus::Timeout
                | TaskRunStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskRunStatus::Pending | TaskRunStatus::Running | TaskRunStatus::Waiting
        )
    }

    /// 状态机：pending → running|cancelled；running → completed|failed|timeout；
    /// 终态只允许通过重试回到 pending。
    pub fn can_transition_to(&self, to: TaskRunStatus) -> bool {
        match self {
            TaskRunStatus::Pending => {
                matches!(to, TaskRunStatus::Running | TaskRunStatus::Cancelled)
            }
            TaskRunStatus::Running => matches!(
                to,
                TaskRunStatus::Completed | TaskRunStatus::Failed | TaskRunStatus::Timeout
            ),
            TaskRunStatus::Waiting => {
                matches!(to, TaskRunStatus::Pending | TaskRunStatus::Cancelled)
            }
            TaskRunStatus::Failed | TaskRunStatus::Timeout => {
                matches!(to, TaskRunStatus::Pending | TaskRunStatus::Failed)
            }
            TaskRunStatus::Completed | TaskRunStatus::Cancelled => false,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskRunStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskRunStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "pending" => Ok(TaskRunStatus::Pending),
            "running" => Ok(TaskRunStatus::Running),
            "waiting" => Ok(TaskRunStatus::Waiting),
            "completed" => Ok(TaskRunStatus::Completed),
            "failed" => Ok(TaskRunStatus::Failed),
            "timeout" => Ok(TaskRunStatus::Timeout),
            "cancelled" => Ok(TaskRunStatus::Cancelled),
            _ => Err(format!("Invalid task run status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskRunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 上游产物引用
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRef {
    pub output_path: String,
    #[serde(default)]
    pub assets: serde_json::Value,
}

/// 历史尝试记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub attempt: i32,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// 心跳进度
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// 任务运行实例
///
/// `attempt` 从1开始；重试把终态行重置回 pending 并递增 `attempt`，
/// 此前的失败以 `AttemptRecord` 追加到 `previous_attempts`。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: String,
    pub task_id: String,
    pub pipeline_run_id: Option<String>,
    pub status: TaskRunStatus,
    pub code_version: i32,
    pub code_hash: String,
    pub attempt: i32,
    pub max_retries: i32,
    pub priority: i32,
    pub input_path: String,
    pub output_path: Option<String>,
    pub output_size: Option<i64>,
    pub assets: Option<serde_json::Value>,
    pub upstream_refs: HashMap<String, UpstreamRef>,
    pub previous_attempts: Vec<AttemptRecord>,
    pub idempotency_key: Option<String>,
    /// None 表示立即可调度
    pub scheduled_for: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TaskRun {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, TaskRunStatus::Running)
    }

    /// 当前调度时间是否已到
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.map(|t| t <= now).unwrap_or(true)
    }
}

// ============================================================================
// 死信
// ============================================================================

/// 死信记录：重试耗尽的任务运行快照，保留重放所需的全部上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    pub id: String,
    pub task_run_id: String,
    pub task_id: String,
    pub pipeline_run_id: Option<String>,
    pub code_version: i32,
    pub code_hash: String,
    pub error: String,
    pub attempts: i32,
    pub input_path: String,
    pub upstream_refs: HashMap<String, UpstreamRef>,
    pub previous_attempts: Vec<AttemptRecord>,
    pub failed_at: DateTime<Utc>,
    pub retried_at: Option<DateTime<Utc>>,
    pub retry_run_id: Option<String>,
}

// ============================================================================
// 幂等缓存
// ============================================================================

/// 幂等缓存条目
///
/// 同一个key同时最多存在一条未过期记录；写入使用 upsert 语义。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyEntry {
    pub key: String,
    pub task_id: String,
    pub task_run_id: String,
    pub code_version: i32,
    pub output_path: String,
    pub output_size: Option<i64>,
    pub assets: Option<serde_json::Value>,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ============================================================================
// 维护状态
// ============================================================================

/// 维护模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MaintenanceMode {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "waiting_for_maintenance")]
    WaitingForMaintenance,
    #[serde(rename = "maintenance")]
    Maintenance,
}

impl MaintenanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceMode::Running => "running",
            MaintenanceMode::WaitingForMaintenance => "waiting_for_maintenance",
            MaintenanceMode::Maintenance => "maintenance",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for MaintenanceMode {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for MaintenanceMode {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "running" => Ok(MaintenanceMode::Running),
            "waiting_for_maintenance" => Ok(MaintenanceMode::WaitingForMaintenance),
            "maintenance" => Ok(MaintenanceMode::Maintenance),
            _ => Err(format!("Invalid maintenance mode: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for MaintenanceMode {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 维护状态（单例行）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceState {
    pub mode: MaintenanceMode,
    pub mode_changed_at: DateTime<Utc>,
}

impl MaintenanceState {
    pub fn running(now: DateTime<Utc>) -> Self {
        Self {
            mode: MaintenanceMode::Running,
            mode_changed_at: now,
        }
    }
}

// ============================================================================
// 队列统计
// ============================================================================

/// 按状态聚合的队列统计，供健康检查与维护门控使用
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusSummary {
    pub pending: i64,
    pub running: i64,
    pub waiting: i64,
    pub completed: i64,
    pub failed: i64,
    pub timeout: i64,
    pub cancelled: i64,
    pub dlq: i64,
    pub oldest_pending: Option<DateTime<Utc>>,
}

impl QueueStatusSummary {
    /// 仍占用系统的活跃运行数
    pub fn active(&self) -> i64 {
        self.pending + self.running + self.waiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_run_status_transitions() {
        use TaskRunStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Timeout));
        assert!(!Running.can_transition_to(Cancelled));
        // 重试：终态回到 pending
        assert!(Failed.can_transition_to(Pending));
        assert!(Timeout.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            TaskRunStatus::Pending,
            TaskRunStatus::Running,
            TaskRunStatus::Waiting,
            TaskRunStatus::Completed,
            TaskRunStatus::Failed,
            TaskRunStatus::Timeout,
            TaskRunStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(
            serde_json::to_string(&FailureMode::FailFast).unwrap(),
            "\"fail-fast\""
        );
        assert_eq!(
            serde_json::to_string(&MaintenanceMode::WaitingForMaintenance).unwrap(),
            "\"waiting_for_maintenance\""
        );
    }

    #[test]
    fn test_task_spec_defaults() {
        let spec: TaskSpec = serde_json::from_str(r#"{"id":"resize"}"#).unwrap();
        assert_eq!(spec.timeout_sec, 300);
        assert_eq!(spec.max_retries, 0);
        assert_eq!(spec.retry_backoff, RetryBackoff::Exponential);
        assert_eq!(spec.retry_delay_ms, 1_000);
        assert_eq!(spec.max_retry_delay_ms, 60_000);
        assert_eq!(spec.heartbeat_interval_ms, 30_000);
        assert_eq!(spec.concurrency, 0);
        assert_eq!(spec.priority, 100);
        assert!(spec.allowed_next.is_empty());
    }

    #[test]
    fn test_idempotency_expiry() {
        let now = Utc::now();
        let entry = IdempotencyEntry {
            key: "v1-o1".to_string(),
            task_id: "pay".to_string(),
            task_run_id: "trun_1".to_string(),
            code_version: 1,
            output_path: "standalone/trun_1/output.json".to_string(),
            output_size: None,
            assets: None,
            cached_at: now,
            expires_at: now + chrono::Duration::seconds(3600),
        };
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + chrono::Duration::seconds(3601)));
    }

    #[test]
    fn test_queue_summary_active() {
        let summary = QueueStatusSummary {
            pending: 2,
            running: 1,
            waiting: 1,
            completed: 10,
            ..Default::default()
        };
        assert_eq!(summary.active(), 4);
    }
}
