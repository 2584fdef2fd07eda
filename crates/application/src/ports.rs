//! 对外端口
//!
//! Worker传输与凭证签发的抽象接口，以及编排器与Worker之间的线上数据形状。
//! 具体实现（HTTP传输、JWT签发）位于 dispatcher crate。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pipeweave_domain::{AttemptRecord, Service, TaskRun, UpstreamRef};
use pipeweave_errors::OrchestratorResult;

/// 任务分发载荷（编排器 → Worker）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub run_id: String,
    pub task_id: String,
    pub code_version: i32,
    pub code_hash: String,
    pub input_path: String,
    pub upstream_refs: HashMap<String, UpstreamRef>,
    /// 短期存储凭证令牌，Worker 凭它直接读写Blob存储
    pub storage_token: String,
    pub attempt: i32,
    pub previous_attempts: Vec<AttemptRecord>,
    pub metadata: serde_json::Value,
}

/// 回调状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CallbackStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failure")]
    Failure,
}

/// 任务结果回调（Worker → 编排器）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackReport {
    pub status: CallbackStatus,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub output_size: Option<i64>,
    #[serde(default)]
    pub assets: Option<serde_json::Value>,
    #[serde(default)]
    pub logs_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    /// 程序化路由：声明后继的子集，非法项被丢弃
    #[serde(default)]
    pub selected_next: Option<Vec<String>>,
}

/// Worker传输抽象
///
/// 分发是同步确认、异步完成：`dispatch` 只确认Worker接收了任务，
/// 结果通过回调接口送达。
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn dispatch(
        &self,
        service: &Service,
        request: &DispatchRequest,
    ) -> OrchestratorResult<()>;
}

/// 存储凭证签发抽象
pub trait CredentialIssuer: Send + Sync {
    fn issue(&self, run: &TaskRun) -> OrchestratorResult<String>;
}

/// tick 驱动抽象：POST /api/tick 通过它触发一次调度循环体
#[async_trait]
pub trait TickDriver: Send + Sync {
    async fn tick(&self) -> OrchestratorResult<usize>;
}
