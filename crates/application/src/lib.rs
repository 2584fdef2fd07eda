//! 应用层
//!
//! 编排器的核心服务：服务注册、流水线校验与执行、任务队列、
//! 重试与死信、心跳监控、幂等缓存和维护状态机。
//! 所有共享状态都在数据库里，服务之间通过仓储抽象协作。

pub mod dlq_service;
pub mod failure_service;
pub mod heartbeat_service;
pub mod idempotency_service;
pub mod maintenance_service;
pub mod pipeline_executor;
pub mod pipeline_graph;
pub mod pipeline_validator;
pub mod ports;
pub mod queue_service;
pub mod retry_service;
pub mod service_registry;

pub use dlq_service::DeadLetterService;
pub use failure_service::{FailureResolution, TaskFailureService};
pub use heartbeat_service::HeartbeatMonitor;
pub use idempotency_service::{CacheStoreRequest, IdempotencyService};
pub use maintenance_service::MaintenanceService;
pub use pipeline_executor::{DryRunReport, PipelineExecutor, PipelineUpsert, TriggerReceipt, TriggerRequest};
pub use pipeline_graph::{ExecutionLevel, LevelType, PipelineGraph};
pub use pipeline_validator::{PipelineValidator, ValidationReport};
pub use ports::{
    CallbackReport, CallbackStatus, CredentialIssuer, DispatchRequest, TickDriver, WorkerTransport,
};
pub use queue_service::{EnqueueReceipt, EnqueueRequest, QueueService};
pub use retry_service::{RetryOutcome, RetryService};
pub use service_registry::ServiceRegistry;
