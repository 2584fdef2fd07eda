use thiserror::Error;


#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("任务运行实例未找到: {id}")]
    TaskRunNotFound { id: String },
    #[error("服务未找到: {id}")]
    ServiceNotFound { id: String },
    #[error("流水线未找到: {id}")]
    PipelineNotFound { id: String },
    #[error("流水线运行实例未找到: {id}")]
    PipelineRunNotFound { id: String },
    #[error("死信记录未找到: {id}")]
    DlqEntryNotFound { id: String },
    #[error("流水线校验失败: {0}")]
    PipelineInvalid(String),
    #[error("非法状态转换: 任务运行 {id} 无法从 {from} 转换到 {to}")]
    IllegalTransition {
        id: String,
        from: String,
        to: String,
    },
    #[error("维护模式冲突: {0}")]
    MaintenanceConflict(String),
    #[error("请求冲突: {0}")]
    Conflict(String),
    #[error("系统处于维护模式，拒绝接收新任务")]
    MaintenanceRejected,
    #[error("任务分发失败: {0}")]
    DispatchFailed(String),
    #[error("凭证令牌错误: {0}")]
    TokenError(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn task_run_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskRunNotFound { id: id.into() }
    }
    pub fn pipeline_not_found<S: Into<String>>(id: S) -> Self {
        Self::PipelineNotFound { id: id.into() }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 瞬时错误：重试调度后可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Database(_)
                | OrchestratorError::DatabaseOperation(_)
                | OrchestratorError::DispatchFailed(_)
        )
    }

    /// 致命错误：继续运行没有意义
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Internal(_) | OrchestratorError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
